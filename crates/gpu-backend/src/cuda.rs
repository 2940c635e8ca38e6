// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! CUDA driver backend (`cuda` feature).
//!
//! Contexts are created lazily, one primary context per device, and bound to
//! the calling thread before each memory primitive. Property queries read
//! the device handle directly and never create a context. The driver API has no
//! sticky per-thread error, so [`take_last_error`](MemoryBackend::take_last_error)
//! always answers `None`.

use crate::{DeviceProperties, DevicePtr, DeviceRuntime, DriverError, MemoryBackend};
use cudarc::driver::sys::{self, CUdevice_attribute as Attr, CUresult};
use cudarc::driver::{result, CudaContext};
use std::cell::Cell;
use std::sync::{Arc, OnceLock};

thread_local! {
    static CURRENT_DEVICE: Cell<i32> = const { Cell::new(0) };
}

/// Backend over the CUDA driver API.
pub struct CudaBackend {
    contexts: Vec<OnceLock<Arc<CudaContext>>>,
}

impl CudaBackend {
    /// Initialises the driver and enumerates devices.
    pub fn new() -> Result<Self, DriverError> {
        result::init().map_err(map_error)?;
        let count = result::device::get_count().map_err(map_error)?;
        tracing::info!("CUDA driver initialised with {count} device(s)");
        Ok(Self {
            contexts: (0..count).map(|_| OnceLock::new()).collect(),
        })
    }

    fn context(&self, device_id: i32) -> Result<&Arc<CudaContext>, DriverError> {
        let slot = usize::try_from(device_id)
            .ok()
            .and_then(|i| self.contexts.get(i))
            .ok_or(DriverError::InvalidDevice(device_id))?;
        if let Some(ctx) = slot.get() {
            return Ok(ctx);
        }
        let ctx = CudaContext::new(device_id as usize).map_err(map_error)?;
        Ok(slot.get_or_init(|| ctx))
    }

    fn bind_current(&self) -> Result<(), DriverError> {
        let device_id = CURRENT_DEVICE.with(Cell::get);
        self.context(device_id)?.bind_to_thread().map_err(map_error)
    }
}

fn map_error(err: cudarc::driver::DriverError) -> DriverError {
    match err.0 {
        CUresult::CUDA_ERROR_OUT_OF_MEMORY => DriverError::OutOfMemory,
        CUresult::CUDA_ERROR_DEINITIALIZED => DriverError::Deinitialized,
        CUresult::CUDA_ERROR_INVALID_DEVICE => DriverError::InvalidDevice(-1),
        CUresult::CUDA_ERROR_INVALID_VALUE => DriverError::InvalidValue,
        CUresult::CUDA_ERROR_NOT_SUPPORTED => DriverError::NotSupported,
        other => DriverError::Other(other as i32),
    }
}

impl MemoryBackend for CudaBackend {
    fn malloc(&self, size: usize, managed: bool) -> Result<DevicePtr, DriverError> {
        self.bind_current()?;
        let ptr = unsafe {
            if managed {
                result::malloc_managed(size, sys::CUmemAttach_flags::CU_MEM_ATTACH_GLOBAL)
            } else {
                result::malloc_sync(size)
            }
        }
        .map_err(map_error)?;
        Ok(DevicePtr::new(ptr))
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), DriverError> {
        self.bind_current()?;
        unsafe { result::free_sync(ptr.addr()) }.map_err(map_error)
    }

    fn mem_get_info(&self) -> Result<(usize, usize), DriverError> {
        self.bind_current()?;
        result::mem_get_info().map_err(map_error)
    }

    fn take_last_error(&self) -> Option<DriverError> {
        None
    }
}

impl DeviceRuntime for CudaBackend {
    fn name(&self) -> &'static str {
        "cuda"
    }

    fn device_count(&self) -> Result<i32, DriverError> {
        result::device::get_count().map_err(map_error)
    }

    fn current_device(&self) -> Result<i32, DriverError> {
        Ok(CURRENT_DEVICE.with(Cell::get))
    }

    fn set_device(&self, device_id: i32) -> Result<(), DriverError> {
        self.context(device_id)?.bind_to_thread().map_err(map_error)?;
        CURRENT_DEVICE.with(|c| c.set(device_id));
        Ok(())
    }

    /// Reads attributes straight from the device handle; no context is
    /// created.
    fn properties(&self, device_id: i32) -> Result<DeviceProperties, DriverError> {
        if usize::try_from(device_id).map_or(true, |i| i >= self.contexts.len()) {
            return Err(DriverError::InvalidDevice(device_id));
        }
        let dev = result::device::get(device_id).map_err(map_error)?;
        let attr = |a: Attr| unsafe { result::device::get_attribute(dev, a) }.map_err(map_error);
        let total_memory_bytes = unsafe { result::device::total_mem(dev) }.map_err(map_error)? as u64;

        Ok(DeviceProperties {
            name: result::device::get_name(dev).map_err(map_error)?,
            total_memory_bytes,
            compute_major: attr(Attr::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)?,
            compute_minor: attr(Attr::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)?,
            multiprocessor_count: attr(Attr::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT)?,
            max_threads_per_multiprocessor: attr(
                Attr::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_MULTIPROCESSOR,
            )?,
            max_threads_per_block: attr(Attr::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)?,
            max_grid_dim: [
                attr(Attr::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_X)?,
                attr(Attr::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Y)?,
                attr(Attr::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Z)?,
            ],
            managed_memory: attr(Attr::CU_DEVICE_ATTRIBUTE_MANAGED_MEMORY)? != 0,
            concurrent_managed_access: attr(Attr::CU_DEVICE_ATTRIBUTE_CONCURRENT_MANAGED_ACCESS)?
                != 0,
        })
    }

    fn driver_version(&self) -> Result<i32, DriverError> {
        let mut version = 0;
        let status = unsafe { sys::cuDriverGetVersion(&mut version) };
        if status != CUresult::CUDA_SUCCESS {
            return Err(map_error(cudarc::driver::DriverError(status)));
        }
        Ok(version)
    }

    /// Only the driver API is linked, so this reports the driver version.
    fn runtime_version(&self) -> Result<i32, DriverError> {
        self.driver_version()
    }
}

impl std::fmt::Debug for CudaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaBackend")
            .field("devices", &self.contexts.len())
            .finish()
    }
}
