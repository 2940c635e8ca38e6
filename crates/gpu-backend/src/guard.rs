// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Scoped device selection.
//!
//! [`DeviceGuard`] makes a device current for the lifetime of the guard and
//! restores the caller's previous device when it is dropped, on every exit
//! path including early returns and unwinding. Native allocate and free
//! primitives act on the thread's current device, so every recorded
//! operation runs inside one of these.

use crate::{DeviceRuntime, DriverError};

/// An RAII guard that pins the calling thread to a device.
///
/// # Example
/// ```
/// use gpu_backend::{DeviceGuard, DeviceRuntime, SimulatedBackend};
///
/// let backend = SimulatedBackend::with_capacities(&[1 << 30, 1 << 30]);
/// assert_eq!(backend.current_device().unwrap(), 0);
/// {
///     let _guard = DeviceGuard::new(&backend, 1).unwrap();
///     assert_eq!(backend.current_device().unwrap(), 1);
/// }
/// assert_eq!(backend.current_device().unwrap(), 0);
/// ```
pub struct DeviceGuard<'a, R: DeviceRuntime + ?Sized> {
    runtime: &'a R,
    /// Device that was current before the guard; `None` when no switch happened.
    previous: Option<i32>,
}

impl<'a, R: DeviceRuntime + ?Sized> DeviceGuard<'a, R> {
    /// Makes `device_id` current on the calling thread.
    ///
    /// If the device is already current no driver call is made and the drop
    /// is a no-op.
    pub fn new(runtime: &'a R, device_id: i32) -> Result<Self, DriverError> {
        let current = runtime.current_device()?;
        if current == device_id {
            return Ok(Self {
                runtime,
                previous: None,
            });
        }
        runtime.set_device(device_id)?;
        Ok(Self {
            runtime,
            previous: Some(current),
        })
    }

    /// Returns `true` if the guard switched devices and will switch back.
    pub fn switched(&self) -> bool {
        self.previous.is_some()
    }
}

impl<R: DeviceRuntime + ?Sized> Drop for DeviceGuard<'_, R> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(e) = self.runtime.set_device(previous) {
                tracing::warn!(device_id = previous, "failed to restore current device: {e}");
            }
        }
    }
}

impl<R: DeviceRuntime + ?Sized> std::fmt::Debug for DeviceGuard<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceGuard")
            .field("previous", &self.previous)
            .finish()
    }
}
