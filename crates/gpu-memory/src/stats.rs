// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-device memory statistics.
//!
//! [`DeviceMemoryStats`] keeps two gauges with high-water marks:
//!
//! - **reserved**: bytes obtained from the native driver, maintained by the
//!   [`RecordedAllocator`](crate::RecordedAllocator) itself;
//! - **allocated**: bytes a higher-level allocator has handed out of those
//!   reservations, reported by that allocator through
//!   [`DeviceMemoryStats::update_allocated`].
//!
//! Updates are lock-free so they can sit on the allocation path.

use crate::units::MIB;
use crate::OomReason;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A current value plus its peak.
#[derive(Debug, Default)]
struct Gauge {
    current: AtomicI64,
    peak: AtomicI64,
}

impl Gauge {
    fn update(&self, delta: i64) {
        let now = self.current.fetch_add(delta, Ordering::AcqRel) + delta;
        self.peak.fetch_max(now, Ordering::AcqRel);
    }

    fn current(&self) -> i64 {
        self.current.load(Ordering::Acquire)
    }

    fn peak(&self) -> i64 {
        self.peak.load(Ordering::Acquire)
    }
}

/// Live statistics for one device.
#[derive(Debug, Default)]
pub struct DeviceMemoryStats {
    reserved: Gauge,
    allocated: Gauge,
    native_allocations: AtomicU64,
    native_frees: AtomicU64,
    limit_oom_count: AtomicU64,
    device_oom_count: AtomicU64,
}

impl DeviceMemoryStats {
    /// Adjusts the allocated gauge by `delta` bytes.
    ///
    /// Called by higher-level allocators when they hand out or take back
    /// sub-allocations of reserved memory.
    pub fn update_allocated(&self, delta: i64) {
        self.allocated.update(delta);
    }

    pub(crate) fn record_reserve(&self, size: usize) {
        self.native_allocations.fetch_add(1, Ordering::Relaxed);
        self.reserved.update(size as i64);
    }

    pub(crate) fn record_release(&self, size: usize) {
        self.native_frees.fetch_add(1, Ordering::Relaxed);
        self.reserved.update(-(size as i64));
    }

    pub(crate) fn record_oom(&self, reason: OomReason) {
        let counter = match reason {
            OomReason::SoftLimit => &self.limit_oom_count,
            OomReason::Device => &self.device_oom_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of every counter.
    pub fn snapshot(&self) -> MemoryStatsSnapshot {
        MemoryStatsSnapshot {
            reserved_bytes: self.reserved.current().max(0) as u64,
            peak_reserved_bytes: self.reserved.peak().max(0) as u64,
            allocated_bytes: self.allocated.current().max(0) as u64,
            peak_allocated_bytes: self.allocated.peak().max(0) as u64,
            native_allocations: self.native_allocations.load(Ordering::Relaxed),
            native_frees: self.native_frees.load(Ordering::Relaxed),
            limit_oom_count: self.limit_oom_count.load(Ordering::Relaxed),
            device_oom_count: self.device_oom_count.load(Ordering::Relaxed),
        }
    }
}

/// A copy of [`DeviceMemoryStats`] taken at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MemoryStatsSnapshot {
    /// Bytes currently reserved from the driver.
    pub reserved_bytes: u64,
    /// High-water mark of `reserved_bytes`.
    pub peak_reserved_bytes: u64,
    /// Bytes currently handed out by higher-level allocators.
    pub allocated_bytes: u64,
    /// High-water mark of `allocated_bytes`.
    pub peak_allocated_bytes: u64,
    /// Successful native allocations.
    pub native_allocations: u64,
    /// Successful native frees.
    pub native_frees: u64,
    /// Requests refused by the soft limit.
    pub limit_oom_count: u64,
    /// Requests refused by the device.
    pub device_oom_count: u64,
}

impl MemoryStatsSnapshot {
    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Reserved {:.2} MB (peak {:.2} MB), allocated {:.2} MB (peak {:.2} MB), \
             {} native allocs, {} native frees, {} OOMs ({} limit, {} device)",
            self.reserved_bytes as f64 / MIB as f64,
            self.peak_reserved_bytes as f64 / MIB as f64,
            self.allocated_bytes as f64 / MIB as f64,
            self.peak_allocated_bytes as f64 / MIB as f64,
            self.native_allocations,
            self.native_frees,
            self.limit_oom_count + self.device_oom_count,
            self.limit_oom_count,
            self.device_oom_count,
        )
    }

    /// The teardown usage line for `device_id`, in MiB or bytes.
    pub fn usage_line(&self, device_id: i32, in_mb: bool) -> String {
        if in_mb {
            format!(
                "[memory usage (MB)] gpu {device_id}: peak reserved = {}, peak allocated = {}",
                self.peak_reserved_bytes as f64 / MIB as f64,
                self.peak_allocated_bytes as f64 / MIB as f64,
            )
        } else {
            format!(
                "[memory usage (bytes)] gpu {device_id}: peak reserved = {}, peak allocated = {}",
                self.peak_reserved_bytes, self.peak_allocated_bytes,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let s = DeviceMemoryStats::default().snapshot();
        assert_eq!(s, MemoryStatsSnapshot::default());
    }

    #[test]
    fn test_reserved_peak() {
        let s = DeviceMemoryStats::default();
        s.record_reserve(100);
        s.record_reserve(200);
        s.record_release(100);
        let snap = s.snapshot();
        assert_eq!(snap.reserved_bytes, 200);
        assert_eq!(snap.peak_reserved_bytes, 300);
        assert_eq!(snap.native_allocations, 2);
        assert_eq!(snap.native_frees, 1);
    }

    #[test]
    fn test_allocated_gauge() {
        let s = DeviceMemoryStats::default();
        s.update_allocated(64);
        s.update_allocated(-32);
        s.update_allocated(0);
        let snap = s.snapshot();
        assert_eq!(snap.allocated_bytes, 32);
        assert_eq!(snap.peak_allocated_bytes, 64);
    }

    #[test]
    fn test_oom_counters() {
        let s = DeviceMemoryStats::default();
        s.record_oom(OomReason::SoftLimit);
        s.record_oom(OomReason::SoftLimit);
        s.record_oom(OomReason::Device);
        let snap = s.snapshot();
        assert_eq!(snap.limit_oom_count, 2);
        assert_eq!(snap.device_oom_count, 1);
        assert!(snap.summary().contains("3 OOMs (2 limit, 1 device)"));
    }

    #[test]
    fn test_usage_line_units() {
        let s = DeviceMemoryStats::default();
        s.record_reserve(3 << 20);
        s.update_allocated(1 << 20);
        let snap = s.snapshot();
        assert_eq!(
            snap.usage_line(0, true),
            "[memory usage (MB)] gpu 0: peak reserved = 3, peak allocated = 1"
        );
        assert_eq!(
            snap.usage_line(2, false),
            "[memory usage (bytes)] gpu 2: peak reserved = 3145728, peak allocated = 1048576"
        );
    }

    #[test]
    fn test_snapshot_serialises() {
        let s = DeviceMemoryStats::default();
        s.record_reserve(10);
        let json = serde_json::to_value(s.snapshot()).unwrap();
        assert_eq!(json["reserved_bytes"], 10);
        assert_eq!(json["peak_reserved_bytes"], 10);
    }
}
