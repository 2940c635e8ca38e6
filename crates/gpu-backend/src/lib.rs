// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # gpu-backend
//!
//! The native capability set underneath the recorded GPU allocator.
//!
//! # Key Components
//!
//! - [`MemoryBackend`] / [`DeviceRuntime`] / [`Backend`]: the traits every
//!   device backend implements. Accounting code above this crate depends on
//!   nothing else.
//! - [`DriverError`]: vendor status codes normalised into one enum.
//! - [`DeviceGuard`]: scoped "make this device current" that always
//!   restores the caller's device.
//! - [`SimulatedBackend`]: in-process devices with fixed capacities, failure
//!   injection and call counters.
//! - `CudaBackend` (feature `cuda`): the CUDA driver API via `cudarc`.
//!
//! # Example
//! ```
//! use gpu_backend::{MemoryBackend, SimulatedBackend};
//!
//! let backend = SimulatedBackend::single(1 << 20);
//! let ptr = backend.malloc(4096, false).unwrap();
//! assert_eq!(backend.mem_get_info().unwrap(), ((1 << 20) - 4096, 1 << 20));
//! backend.free(ptr).unwrap();
//! ```

mod backend;
#[cfg(feature = "cuda")]
mod cuda;
mod error;
mod guard;
mod properties;
mod ptr;
mod simulated;

pub use backend::{Backend, DeviceRuntime, MemoryBackend};
#[cfg(feature = "cuda")]
pub use cuda::CudaBackend;
pub use error::DriverError;
pub use guard::DeviceGuard;
pub use properties::DeviceProperties;
pub use ptr::{DevicePtr, PhysicalHandle};
pub use simulated::SimulatedBackend;
