// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Backends used only by unit tests.

use gpu_backend::{
    DeviceProperties, DevicePtr, DeviceRuntime, DriverError, MemoryBackend, SimulatedBackend,
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Simulated devices that count property reads and fail them for one device.
#[derive(Debug)]
pub(crate) struct PropertyCountingBackend {
    inner: SimulatedBackend,
    property_calls: AtomicUsize,
    broken_device: Option<i32>,
}

impl PropertyCountingBackend {
    pub(crate) fn new(devices: usize, broken_device: Option<i32>) -> Self {
        Self {
            inner: SimulatedBackend::with_capacities(&vec![1 << 30; devices]),
            property_calls: AtomicUsize::new(0),
            broken_device,
        }
    }

    pub(crate) fn property_calls(&self) -> usize {
        self.property_calls.load(Ordering::Acquire)
    }

    pub(crate) fn device_count_calls(&self) -> usize {
        self.inner.device_count_calls()
    }
}

impl MemoryBackend for PropertyCountingBackend {
    fn malloc(&self, size: usize, managed: bool) -> Result<DevicePtr, DriverError> {
        self.inner.malloc(size, managed)
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), DriverError> {
        self.inner.free(ptr)
    }

    fn mem_get_info(&self) -> Result<(usize, usize), DriverError> {
        self.inner.mem_get_info()
    }

    fn take_last_error(&self) -> Option<DriverError> {
        self.inner.take_last_error()
    }
}

impl DeviceRuntime for PropertyCountingBackend {
    fn name(&self) -> &'static str {
        "property-counting"
    }

    fn device_count(&self) -> Result<i32, DriverError> {
        self.inner.device_count()
    }

    fn current_device(&self) -> Result<i32, DriverError> {
        self.inner.current_device()
    }

    fn set_device(&self, device_id: i32) -> Result<(), DriverError> {
        self.inner.set_device(device_id)
    }

    fn properties(&self, device_id: i32) -> Result<DeviceProperties, DriverError> {
        self.property_calls.fetch_add(1, Ordering::AcqRel);
        if self.broken_device == Some(device_id) {
            return Err(DriverError::Other(999));
        }
        self.inner.properties(device_id)
    }

    fn driver_version(&self) -> Result<i32, DriverError> {
        self.inner.driver_version()
    }

    fn runtime_version(&self) -> Result<i32, DriverError> {
        self.inner.runtime_version()
    }
}
