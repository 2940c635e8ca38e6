// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The process-wide registry and free-function access to it.
//!
//! The device driver's allocation state is process-wide, so the framework
//! keeps one [`DeviceLimitRegistry`] for the whole process. Either
//! [`install`] one explicitly before first use, or let the first call build
//! it from `GPUMEM_*` environment overrides over the default configuration
//! and the default backend (CUDA under the `cuda` feature, otherwise one
//! simulated 16 GiB device).
//!
//! Installed registries are leaked and never dropped, so binaries that want
//! the peak-usage lines call [`log_peak_usage`] before exiting. Test builds
//! (`cfg(test)` or the `testing` feature) can [`reset`] the slot; references
//! handed out earlier stay valid and keep pointing at the old registry.

use crate::{AllocError, AllocatorConfig, DeviceLimitRegistry, MemInfo};
use gpu_backend::{Backend, DevicePtr, SimulatedBackend};
use std::sync::{Arc, PoisonError, RwLock};

static REGISTRY: RwLock<Option<&'static DeviceLimitRegistry>> = RwLock::new(None);

fn current() -> Option<&'static DeviceLimitRegistry> {
    *REGISTRY.read().unwrap_or_else(PoisonError::into_inner)
}

/// Installs the process-wide registry.
///
/// # Errors
/// [`AllocError::Config`] if a registry is already in place, installed or
/// built lazily.
pub fn install(registry: DeviceLimitRegistry) -> Result<(), AllocError> {
    let mut slot = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return Err(AllocError::Config(
            "process-wide registry already initialised".into(),
        ));
    }
    *slot = Some(&*Box::leak(Box::new(registry)));
    Ok(())
}

/// The process-wide registry, built on first use if none was installed.
pub fn registry() -> &'static DeviceLimitRegistry {
    if let Some(registry) = current() {
        return registry;
    }
    let mut slot = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    *slot.get_or_insert_with(|| {
        let config = AllocatorConfig::default()
            .with_env_overrides()
            .unwrap_or_else(|e| {
                tracing::warn!("ignoring GPUMEM_* overrides: {e}");
                AllocatorConfig::default()
            });
        &*Box::leak(Box::new(DeviceLimitRegistry::new(config, default_backend())))
    })
}

/// Empties the process-wide slot so the next [`install`] or [`registry`]
/// call starts fresh. The previous registry is not dropped.
#[cfg(any(test, feature = "testing"))]
pub fn reset() {
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}

/// The backend selected at build time.
pub fn default_backend() -> Arc<dyn Backend> {
    #[cfg(feature = "cuda")]
    {
        match gpu_backend::CudaBackend::new() {
            Ok(backend) => Arc::new(backend) as Arc<dyn Backend>,
            Err(e) => {
                tracing::warn!("CUDA driver unavailable ({e}); running with no devices");
                Arc::new(SimulatedBackend::new(Vec::new()))
            }
        }
    }
    #[cfg(not(feature = "cuda"))]
    {
        Arc::new(SimulatedBackend::default())
    }
}

pub fn allocate(device_id: i32, size: usize, managed: bool) -> Result<DevicePtr, AllocError> {
    registry().allocate(device_id, size, managed)
}

pub fn free(device_id: i32, ptr: DevicePtr, size: usize) -> Result<(), AllocError> {
    registry().free(device_id, ptr, size)
}

pub fn mem_info(device_id: i32) -> Result<MemInfo, AllocError> {
    registry().mem_info(device_id)
}

pub fn recorded_size(device_id: i32) -> Result<u64, AllocError> {
    registry().recorded_size(device_id)
}

pub fn limit_size(device_id: i32) -> Result<u64, AllocError> {
    registry().limit_size(device_id)
}

pub fn is_recording(device_id: i32) -> Result<bool, AllocError> {
    registry().is_recording(device_id)
}

/// Base address of the recorded block containing `ptr`; diagnostic builds only.
pub fn base_pointer(device_id: i32, ptr: DevicePtr) -> Result<Option<DevicePtr>, AllocError> {
    registry().base_pointer(device_id, ptr)
}

/// `(available, total)` on the calling thread's current device.
pub fn memory_usage() -> Result<(usize, usize), AllocError> {
    registry().memory_usage()
}

pub fn log_peak_usage() {
    if let Some(registry) = current() {
        registry.log_peak_usage();
    }
}
