// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Limit-enforcing passthrough to the native allocator for one device.
//!
//! A [`RecordedAllocator`]:
//!
//! 1. Rejects allocations that would push the recorded total past the
//!    device's soft limit, before touching the driver.
//! 2. Runs every native call with its device made current through a
//!    [`DeviceGuard`], whatever device the calling thread had selected.
//! 3. Normalises driver status codes: out-of-memory becomes
//!    [`AllocError::OutOfMemory`], "driver unloading" on free is ignored, and
//!    anything else is fatal.
//! 4. Keeps the recorded total, the reserved-memory gauge and (in
//!    diagnostic builds) the outstanding-address index in step.
//!
//! # Concurrency
//! The recorded total is a single atomic. The limit check and the commit are
//! two separate operations, so two threads near the limit can both pass the
//! check before either commits and overshoot the limit by at most the
//! smaller request. The limit is admission control, not isolation; callers
//! that need a hard cap must serialise large allocations themselves.
//!
//! The mutex, present only when recording, guards the read-and-compute
//! sequence of [`RecordedAllocator::mem_info`]. It is never held across a
//! native allocate or free.

use crate::error::fatal;
use crate::{AllocError, BasePointerIndex, DeviceMemoryStats, OomReason};
use gpu_backend::{Backend, DeviceGuard, DevicePtr, DriverError, PhysicalHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Device memory as seen through the soft limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MemInfo {
    /// Bytes the caller may still obtain: the smaller of the device's free
    /// memory and the headroom under the soft limit.
    pub available: usize,
    /// Device total, capped at the soft limit.
    pub total: usize,
    /// Free bytes reported by the driver.
    pub actual_available: usize,
    /// Total bytes reported by the driver.
    pub actual_total: usize,
    /// `true` when the soft limit is below the physical total.
    pub clamped: bool,
}

/// Recorded allocation for a single device. See the module docs.
pub struct RecordedAllocator {
    device_id: i32,
    /// Soft cap in bytes; `0` disables recording.
    limit_bytes: u64,
    current_bytes: AtomicU64,
    /// Present only when recording.
    mem_info_lock: Option<Mutex<()>>,
    backend: Arc<dyn Backend>,
    stats: DeviceMemoryStats,
    index: BasePointerIndex,
    /// `Some(in_mb)` when the teardown usage line is enabled.
    usage_log: Option<bool>,
    #[cfg(test)]
    section: section::CriticalSectionCounter,
}

impl RecordedAllocator {
    /// Creates the allocator for `device_id` with a soft limit of
    /// `limit_bytes` (`0` = unlimited).
    pub fn new(device_id: i32, limit_bytes: u64, backend: Arc<dyn Backend>) -> Self {
        Self {
            device_id,
            limit_bytes,
            current_bytes: AtomicU64::new(0),
            mem_info_lock: (limit_bytes != 0).then(|| Mutex::new(())),
            backend,
            stats: DeviceMemoryStats::default(),
            index: BasePointerIndex::default(),
            usage_log: None,
            #[cfg(test)]
            section: Default::default(),
        }
    }

    /// Enables the peak-usage line at teardown, in MiB or bytes.
    pub fn with_usage_log(mut self, in_mb: bool) -> Self {
        self.usage_log = Some(in_mb);
        self
    }

    pub fn device_id(&self) -> i32 {
        self.device_id
    }

    /// The soft limit in bytes (`0` = unlimited).
    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    /// Bytes currently recorded as reserved from the driver.
    pub fn recorded_bytes(&self) -> u64 {
        self.current_bytes.load(Ordering::Acquire)
    }

    /// `true` when a soft limit is enforced.
    pub fn is_recording(&self) -> bool {
        self.limit_bytes != 0
    }

    /// Live statistics; higher-level allocators report through
    /// [`DeviceMemoryStats::update_allocated`].
    pub fn stats(&self) -> &DeviceMemoryStats {
        &self.stats
    }

    /// Allocates `size` bytes on this device.
    ///
    /// Returns [`AllocError::OutOfMemory`] if the soft limit would be
    /// exceeded (no device call is made) or the device itself is out of
    /// memory; the thread's sticky driver error is cleared in that case.
    /// Any other driver failure is fatal.
    ///
    /// A zero-sized request returns a null pointer and records nothing.
    pub fn allocate(&self, size: usize, managed: bool) -> Result<DevicePtr, AllocError> {
        if size == 0 {
            return Ok(DevicePtr::NULL);
        }

        if self.is_recording() {
            let current = self.current_bytes.load(Ordering::Acquire);
            let over = current
                .checked_add(size as u64)
                .map_or(true, |total| total > self.limit_bytes);
            if over {
                tracing::debug!(
                    device_id = self.device_id,
                    size,
                    current,
                    limit = self.limit_bytes,
                    "allocation rejected by soft limit"
                );
                return Err(self.out_of_memory(size, OomReason::SoftLimit));
            }
        }

        let result = {
            let _device = self.enter_device();
            self.backend.malloc(size, managed)
        };
        tracing::debug!(
            device_id = self.device_id,
            managed,
            "native malloc size={:.3} MB, ok={}",
            size as f64 / (1 << 20) as f64,
            result.is_ok()
        );

        match result {
            Ok(ptr) => {
                self.current_bytes.fetch_add(size as u64, Ordering::AcqRel);
                self.stats.record_reserve(size);
                self.index.insert(ptr);
                tracing::trace!(device_id = self.device_id, %ptr, size, "reserved_allocate");
                Ok(ptr)
            }
            Err(status) => {
                self.clear_out_of_memory("allocate", status);
                Err(self.out_of_memory(size, OomReason::Device))
            }
        }
    }

    /// Returns a block obtained from [`RecordedAllocator::allocate`]. A null
    /// pointer is ignored.
    ///
    /// If the driver is already unloading (process teardown) the call is
    /// treated as done and the recorded total is left alone. Any other
    /// driver failure is fatal.
    pub fn free(&self, ptr: DevicePtr, size: usize) {
        if ptr.is_null() {
            return;
        }
        let result = {
            let _device = self.enter_device();
            self.backend.free(ptr)
        };
        tracing::debug!(
            device_id = self.device_id,
            "native free size={:.3} MB",
            size as f64 / (1 << 20) as f64
        );

        match result {
            Ok(()) => {
                let previous = self.current_bytes.fetch_sub(size as u64, Ordering::AcqRel);
                debug_assert!(previous >= size as u64, "recorded size underflow");
                self.stats.record_release(size);
                tracing::trace!(device_id = self.device_id, %ptr, size, "reserved_free");
            }
            Err(DriverError::Deinitialized) => {
                let _ = self.backend.take_last_error();
                tracing::debug!(device_id = self.device_id, %ptr, "driver unloading, free skipped");
            }
            Err(status) => fatal(self.device_id, "free", status),
        }
        self.index.remove(ptr);
    }

    /// Queries device memory and applies the soft limit.
    pub fn mem_info(&self) -> MemInfo {
        let (actual_available, actual_total) = {
            let _device = self.enter_device();
            match self.backend.mem_get_info() {
                Ok(info) => info,
                Err(status) => {
                    self.clear_out_of_memory("query memory info", status);
                    (0, 0)
                }
            }
        };

        let Some(lock) = &self.mem_info_lock else {
            return MemInfo {
                available: actual_available,
                total: actual_total,
                actual_available,
                actual_total,
                clamped: false,
            };
        };

        let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);
        #[cfg(test)]
        let _section = self.section.enter();

        let limit = usize::try_from(self.limit_bytes).unwrap_or(usize::MAX);
        let recorded = usize::try_from(self.recorded_bytes()).unwrap_or(usize::MAX);
        let available = actual_available.min(limit.saturating_sub(recorded));
        let total = actual_total.min(limit);
        MemInfo {
            available,
            total,
            actual_available,
            actual_total,
            clamped: total < actual_total,
        }
    }

    /// Base address of the recorded block containing `ptr`, i.e. the largest
    /// outstanding block address `<= ptr`.
    ///
    /// Fails with [`AllocError::Unimplemented`] unless the diagnostic index
    /// is compiled in.
    pub fn base_ptr(&self, ptr: DevicePtr) -> Result<Option<DevicePtr>, AllocError> {
        self.index.base_of(ptr)
    }

    /// Creates a physical allocation for virtual memory mapping.
    ///
    /// The driver status is returned as is; the recorded total grows only
    /// on success. The soft limit is not consulted.
    pub fn mem_create(&self, size: usize) -> Result<PhysicalHandle, DriverError> {
        let handle = {
            let _device = self.enter_device();
            self.backend.mem_create(size)?
        };
        self.current_bytes.fetch_add(size as u64, Ordering::AcqRel);
        Ok(handle)
    }

    /// Releases a physical allocation made by [`RecordedAllocator::mem_create`].
    pub fn mem_release(&self, handle: PhysicalHandle, size: usize) -> Result<(), DriverError> {
        {
            let _device = self.enter_device();
            self.backend.mem_release(handle)?;
        }
        self.current_bytes.fetch_sub(size as u64, Ordering::AcqRel);
        Ok(())
    }

    /// The peak-usage line for this device.
    pub fn usage_line(&self, in_mb: bool) -> String {
        self.stats.snapshot().usage_line(self.device_id, in_mb)
    }

    /// Emits the peak-usage line if usage logging is enabled and this
    /// device is recording.
    pub fn log_peak_usage(&self) {
        if let Some(in_mb) = self.usage_log {
            if self.is_recording() {
                tracing::info!(target: "gpu_memory::usage", "{}", self.usage_line(in_mb));
            }
        }
    }

    fn enter_device(&self) -> DeviceGuard<'_, dyn Backend> {
        DeviceGuard::new(&*self.backend, self.device_id)
            .unwrap_or_else(|e| fatal(self.device_id, "set device", e))
    }

    /// Accepts an out-of-memory status and clears the thread's sticky
    /// error; any other status, now or left behind in the sticky error,
    /// is fatal.
    fn clear_out_of_memory(&self, op: &str, status: DriverError) {
        if !status.is_out_of_memory() {
            fatal(self.device_id, op, status);
        }
        if let Some(sticky) = self.backend.take_last_error() {
            if !sticky.is_out_of_memory() {
                fatal(self.device_id, op, sticky);
            }
        }
    }

    fn out_of_memory(&self, size: usize, reason: OomReason) -> AllocError {
        self.stats.record_oom(reason);
        AllocError::OutOfMemory {
            device_id: self.device_id,
            requested_bytes: size,
            reason,
        }
    }
}

impl Drop for RecordedAllocator {
    fn drop(&mut self) {
        self.log_peak_usage();
    }
}

impl std::fmt::Debug for RecordedAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordedAllocator")
            .field("device_id", &self.device_id)
            .field("limit_bytes", &self.limit_bytes)
            .field("recorded_bytes", &self.recorded_bytes())
            .finish()
    }
}
