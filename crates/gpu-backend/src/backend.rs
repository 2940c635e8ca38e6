// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The backend capability set.
//!
//! Device vendors expose the same small set of primitives under different
//! names. The recorded allocator only ever talks to these traits, so the
//! accounting logic is identical whichever backend is compiled in.
//!
//! - [`MemoryBackend`]: native allocate, free, memory query and
//!   last-error clearing. These always act on the calling thread's
//!   *current* device.
//! - [`DeviceRuntime`]: enumeration, the thread-ambient current device and
//!   static properties.
//!
//! [`Backend`] is the union of both and is what registries hold.

use crate::{DeviceProperties, DevicePtr, DriverError, PhysicalHandle};

/// Native memory primitives, acting on the calling thread's current device.
pub trait MemoryBackend: Send + Sync {
    /// Allocates `size` bytes, as managed (unified) memory when `managed`.
    fn malloc(&self, size: usize, managed: bool) -> Result<DevicePtr, DriverError>;

    /// Releases a block previously returned by [`MemoryBackend::malloc`].
    fn free(&self, ptr: DevicePtr) -> Result<(), DriverError>;

    /// Returns `(free, total)` bytes of the current device.
    fn mem_get_info(&self) -> Result<(usize, usize), DriverError>;

    /// Returns and clears the calling thread's sticky error, if any.
    fn take_last_error(&self) -> Option<DriverError>;

    /// Creates a physical allocation for virtual memory mapping.
    fn mem_create(&self, _size: usize) -> Result<PhysicalHandle, DriverError> {
        Err(DriverError::NotSupported)
    }

    /// Releases a physical allocation created by [`MemoryBackend::mem_create`].
    fn mem_release(&self, _handle: PhysicalHandle) -> Result<(), DriverError> {
        Err(DriverError::NotSupported)
    }
}

/// Device enumeration and thread-ambient device selection.
pub trait DeviceRuntime: Send + Sync {
    /// Short backend name for logs (`"cuda"`, `"simulated"`).
    fn name(&self) -> &'static str;

    /// Number of visible devices.
    fn device_count(&self) -> Result<i32, DriverError>;

    /// The calling thread's current device.
    fn current_device(&self) -> Result<i32, DriverError>;

    /// Changes the calling thread's current device.
    fn set_device(&self, device_id: i32) -> Result<(), DriverError>;

    fn properties(&self, device_id: i32) -> Result<DeviceProperties, DriverError>;

    /// Driver version, encoded as `1000 * major + 10 * minor`.
    fn driver_version(&self) -> Result<i32, DriverError>;

    /// Runtime library version, same encoding as the driver version.
    fn runtime_version(&self) -> Result<i32, DriverError>;
}

/// A complete backend: memory primitives plus device runtime.
pub trait Backend: MemoryBackend + DeviceRuntime {}

impl<T: MemoryBackend + DeviceRuntime> Backend for T {}
