// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The per-device allocator table.
//!
//! [`DeviceLimitRegistry`] builds one [`RecordedAllocator`] per visible
//! device the first time any device is looked up, from any thread. The
//! table is never rebuilt; later lookups are a bounds check and an index.
//! Device enumeration goes through the registry's [`DeviceQuery`], so the
//! backend is asked for the device count exactly once. Building the table
//! reads no device properties.

use crate::{
    AllocError, AllocatorConfig, DeviceQuery, MemInfo, RecordedAllocator, SizingConfig,
    SizingPolicy,
};
use gpu_backend::{Backend, DevicePtr};
use std::sync::{Arc, OnceLock};

/// Lazily built table of per-device recorded allocators.
pub struct DeviceLimitRegistry {
    config: AllocatorConfig,
    backend: Arc<dyn Backend>,
    query: DeviceQuery,
    allocators: OnceLock<Vec<RecordedAllocator>>,
}

impl DeviceLimitRegistry {
    /// Creates an empty registry. Nothing touches the backend until the
    /// first lookup.
    pub fn new(config: AllocatorConfig, backend: Arc<dyn Backend>) -> Self {
        let query = DeviceQuery::new(backend.clone(), config.selected_devices.clone());
        Self {
            config,
            backend,
            query,
            allocators: OnceLock::new(),
        }
    }

    /// The allocator for `device_id`, building the table on first use.
    ///
    /// # Errors
    /// [`AllocError::OutOfRange`] if `device_id` is negative or not below
    /// the device count.
    pub fn instance(&self, device_id: i32) -> Result<&RecordedAllocator, AllocError> {
        let table = self.allocators.get_or_init(|| self.build());
        usize::try_from(device_id)
            .ok()
            .and_then(|i| table.get(i))
            .ok_or(AllocError::OutOfRange {
                device_id,
                device_count: table.len(),
            })
    }

    fn build(&self) -> Vec<RecordedAllocator> {
        let count = self.query.device_count();
        let limit = self.config.limit_bytes();
        tracing::info!(
            backend = self.backend.name(),
            devices = count,
            limit_mb = self.config.memory_limit_mb,
            "building device allocator table"
        );
        (0..count as i32)
            .map(|id| {
                let allocator = RecordedAllocator::new(id, limit, self.backend.clone());
                if self.config.enable_usage_log {
                    allocator.with_usage_log(self.config.usage_log_in_mb)
                } else {
                    allocator
                }
            })
            .collect()
    }

    pub fn device_count(&self) -> usize {
        self.query.device_count()
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Device information for the registry's backend.
    pub fn query(&self) -> &DeviceQuery {
        &self.query
    }

    /// Reservation sizing for `device_id` under the registry's configuration.
    pub fn sizing(&self, device_id: i32) -> Result<SizingPolicy<'_>, AllocError> {
        let allocator = self.instance(device_id)?;
        Ok(SizingPolicy::new(allocator, SizingConfig::from(&self.config)))
    }

    pub fn allocate(
        &self,
        device_id: i32,
        size: usize,
        managed: bool,
    ) -> Result<DevicePtr, AllocError> {
        self.instance(device_id)?.allocate(size, managed)
    }

    /// Frees a block. Only a bad device id is reported; driver failures are
    /// fatal.
    pub fn free(&self, device_id: i32, ptr: DevicePtr, size: usize) -> Result<(), AllocError> {
        self.instance(device_id)?.free(ptr, size);
        Ok(())
    }

    pub fn mem_info(&self, device_id: i32) -> Result<MemInfo, AllocError> {
        Ok(self.instance(device_id)?.mem_info())
    }

    pub fn recorded_size(&self, device_id: i32) -> Result<u64, AllocError> {
        Ok(self.instance(device_id)?.recorded_bytes())
    }

    pub fn limit_size(&self, device_id: i32) -> Result<u64, AllocError> {
        Ok(self.instance(device_id)?.limit_bytes())
    }

    pub fn is_recording(&self, device_id: i32) -> Result<bool, AllocError> {
        Ok(self.instance(device_id)?.is_recording())
    }

    pub fn base_pointer(
        &self,
        device_id: i32,
        ptr: DevicePtr,
    ) -> Result<Option<DevicePtr>, AllocError> {
        self.instance(device_id)?.base_ptr(ptr)
    }

    /// `(available, total)` bytes on the calling thread's current device,
    /// as seen through its soft limit.
    pub fn memory_usage(&self) -> Result<(usize, usize), AllocError> {
        let info = self.mem_info(self.query.current_device_id())?;
        Ok((info.available, info.total))
    }

    /// Emits the peak-usage line of every built allocator that logs usage.
    pub fn log_peak_usage(&self) {
        if let Some(table) = self.allocators.get() {
            table.iter().for_each(RecordedAllocator::log_peak_usage);
        }
    }

    /// Drops the allocator table and the cached device properties so the
    /// next lookup rebuilds both.
    #[cfg(any(test, feature = "testing"))]
    pub fn reset(&mut self) {
        self.allocators.take();
        self.query = DeviceQuery::new(self.backend.clone(), self.config.selected_devices.clone());
    }
}

impl std::fmt::Debug for DeviceLimitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLimitRegistry")
            .field("backend", &self.backend.name())
            .field("limit_bytes", &self.config.limit_bytes())
            .field("built", &self.allocators.get().map(Vec::len))
            .finish()
    }
}
