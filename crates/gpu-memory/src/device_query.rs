// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Read-only device information.
//!
//! The device count is read from the backend once, on first use. Each
//! device's properties are read the first time that device is queried and
//! cached for the life of the query; counting devices never reads them. The only mutating call is
//! [`DeviceQuery::set_device`], which changes the calling thread's ambient
//! device and is not synchronised with anything else.

use crate::error::fatal;
use crate::AllocError;
use gpu_backend::{Backend, DeviceProperties};
use std::sync::{Arc, OnceLock};

/// Minimum compute capability with tensor cores.
const TENSOR_CORE_MIN_CAPABILITY: i32 = 70;

/// Device count, versions, limits and capability queries over a backend.
pub struct DeviceQuery {
    backend: Arc<dyn Backend>,
    selected: Vec<i32>,
    /// One slot per device, filled on first query of that device.
    slots: OnceLock<Vec<OnceLock<DeviceProperties>>>,
}

impl DeviceQuery {
    /// `selected` lists the devices the process uses; empty means all.
    pub fn new(backend: Arc<dyn Backend>, selected: Vec<i32>) -> Self {
        Self {
            backend,
            selected,
            slots: OnceLock::new(),
        }
    }

    fn slots(&self) -> &[OnceLock<DeviceProperties>] {
        self.slots.get_or_init(|| {
            let count = match self.backend.device_count() {
                Ok(n) => n.max(0),
                Err(e) => {
                    tracing::warn!(backend = self.backend.name(), "device count query failed: {e}");
                    0
                }
            };
            (0..count).map(|_| OnceLock::new()).collect()
        })
    }

    fn slot(&self, device_id: i32) -> Result<&OnceLock<DeviceProperties>, AllocError> {
        let slots = self.slots();
        usize::try_from(device_id)
            .ok()
            .and_then(|i| slots.get(i))
            .ok_or(AllocError::OutOfRange {
                device_id,
                device_count: slots.len(),
            })
    }

    fn checked(&self, device_id: i32) -> Result<&DeviceProperties, AllocError> {
        Ok(self.slot(device_id)?.get_or_init(|| {
            self.backend
                .properties(device_id)
                .unwrap_or_else(|e| fatal(device_id, "query device properties", e))
        }))
    }

    /// Number of visible devices. Reads no device properties.
    pub fn device_count(&self) -> usize {
        self.slots().len()
    }

    /// The calling thread's current device.
    pub fn current_device_id(&self) -> i32 {
        self.backend
            .current_device()
            .unwrap_or_else(|e| fatal(-1, "get current device", e))
    }

    /// Makes `device_id` current on the calling thread.
    pub fn set_device(&self, device_id: i32) -> Result<(), AllocError> {
        self.slot(device_id)?;
        self.backend
            .set_device(device_id)
            .unwrap_or_else(|e| fatal(device_id, "set device", e));
        Ok(())
    }

    /// The full properties record of a device.
    pub fn properties(&self, device_id: i32) -> Result<&DeviceProperties, AllocError> {
        self.checked(device_id)
    }

    /// Compute capability as `10 * major + minor`, e.g. `86` for sm_86.
    pub fn compute_capability(&self, device_id: i32) -> Result<i32, AllocError> {
        Ok(self.checked(device_id)?.compute_capability())
    }

    pub fn multiprocessors(&self, device_id: i32) -> Result<i32, AllocError> {
        Ok(self.checked(device_id)?.multiprocessor_count)
    }

    pub fn max_threads_per_multiprocessor(&self, device_id: i32) -> Result<i32, AllocError> {
        Ok(self.checked(device_id)?.max_threads_per_multiprocessor)
    }

    pub fn max_threads_per_block(&self, device_id: i32) -> Result<i32, AllocError> {
        Ok(self.checked(device_id)?.max_threads_per_block)
    }

    pub fn max_grid_dim_size(&self, device_id: i32) -> Result<[i32; 3], AllocError> {
        Ok(self.checked(device_id)?.max_grid_dim)
    }

    /// Driver version as `1000 * major + 10 * minor`.
    pub fn driver_version(&self, device_id: i32) -> Result<i32, AllocError> {
        self.slot(device_id)?;
        Ok(self
            .backend
            .driver_version()
            .unwrap_or_else(|e| fatal(device_id, "query driver version", e)))
    }

    /// Runtime version as `1000 * major + 10 * minor`.
    pub fn runtime_version(&self, device_id: i32) -> Result<i32, AllocError> {
        self.slot(device_id)?;
        Ok(self
            .backend
            .runtime_version()
            .unwrap_or_else(|e| fatal(device_id, "query runtime version", e)))
    }

    /// Devices selected for use by this process.
    pub fn selected_devices(&self) -> Result<Vec<i32>, AllocError> {
        let count = self.device_count();
        if self.selected.is_empty() {
            return Ok((0..count as i32).collect());
        }
        for &id in &self.selected {
            self.slot(id)?;
        }
        Ok(self.selected.clone())
    }

    /// Whether the current device has tensor cores.
    pub fn tensor_core_available(&self) -> bool {
        let current = self.current_device_id();
        self.compute_capability(current)
            .map(|cc| cc >= TENSOR_CORE_MIN_CAPABILITY)
            .unwrap_or(false)
    }

    pub fn is_managed_memory_supported(&self, device_id: i32) -> Result<bool, AllocError> {
        Ok(self.checked(device_id)?.managed_memory)
    }

    /// Whether managed allocations may exceed physical device memory.
    /// Requires concurrent managed access, which only Linux drivers offer.
    pub fn is_managed_memory_oversubscription_supported(
        &self,
        device_id: i32,
    ) -> Result<bool, AllocError> {
        let props = self.checked(device_id)?;
        Ok(cfg!(target_os = "linux") && props.managed_memory && props.concurrent_managed_access)
    }
}

impl std::fmt::Debug for DeviceQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceQuery")
            .field("backend", &self.backend.name())
            .field("selected", &self.selected)
            .field(
                "cached",
                &self
                    .slots
                    .get()
                    .map(|slots| slots.iter().filter(|s| s.get().is_some()).count()),
            )
            .finish()
    }
}
