// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Static per-device properties.

/// The raw device-properties record for one device.
///
/// Backends fill this once per device; the query facade caches it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeviceProperties {
    /// Marketing name of the device.
    pub name: String,
    /// Physical memory on the device in bytes.
    pub total_memory_bytes: u64,
    /// Compute capability major version.
    pub compute_major: i32,
    /// Compute capability minor version.
    pub compute_minor: i32,
    /// Number of streaming multiprocessors.
    pub multiprocessor_count: i32,
    pub max_threads_per_multiprocessor: i32,
    pub max_threads_per_block: i32,
    /// Maximum grid size along x, y and z.
    pub max_grid_dim: [i32; 3],
    /// The device can allocate managed (unified) memory.
    pub managed_memory: bool,
    /// The device can access managed memory concurrently with the host.
    pub concurrent_managed_access: bool,
}

impl DeviceProperties {
    /// A plausible data-centre class device with the given memory size.
    pub fn simulated(name: impl Into<String>, total_memory_bytes: u64) -> Self {
        Self {
            name: name.into(),
            total_memory_bytes,
            compute_major: 8,
            compute_minor: 0,
            multiprocessor_count: 108,
            max_threads_per_multiprocessor: 2048,
            max_threads_per_block: 1024,
            max_grid_dim: [i32::MAX, 65535, 65535],
            managed_memory: true,
            concurrent_managed_access: true,
        }
    }

    /// Compute capability encoded as `major * 10 + minor` (e.g. `80`).
    pub fn compute_capability(&self) -> i32 {
        self.compute_major * 10 + self.compute_minor
    }
}
