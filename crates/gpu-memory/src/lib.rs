// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # gpu-memory
//!
//! Device-scoped GPU memory accounting under a soft per-device limit.
//!
//! # Key Components
//!
//! - [`RecordedAllocator`]: one per device. Checks the soft limit, calls
//!   the native allocator with the device made current, keeps an atomic
//!   byte total and normalises driver errors (out-of-memory is returned,
//!   anything unexplained is fatal).
//! - [`DeviceLimitRegistry`]: builds the allocator table once, on first use
//!   from any thread, and hands out allocators by device ordinal.
//! - [`SizingPolicy`]: how much a higher-level allocator should reserve up
//!   front and on each growth step.
//! - [`DeviceQuery`]: device count, versions, limits and capabilities.
//! - [`BasePointerIndex`]: maps an interior address to its block; compiled
//!   in only under the `testing` feature.
//! - [`global`]: the process-wide registry and free-function access.
//!
//! # Data Flow
//!
//! ```text
//! caller ──► SizingPolicy ──► RecordedAllocator::mem_info ──► backend
//!    │                               (limit-clamped view)
//!    └─────► RecordedAllocator::allocate / free
//!                 │ limit check (no driver call)
//!                 │ DeviceGuard(device_id)
//!                 ▼
//!              backend malloc / free ──► byte total, stats, address index
//! ```
//!
//! # Example
//! ```
//! use gpu_backend::SimulatedBackend;
//! use gpu_memory::{AllocError, AllocatorConfig, DeviceLimitRegistry};
//! use std::sync::Arc;
//!
//! let config = AllocatorConfig { memory_limit_mb: 100, ..Default::default() };
//! let registry = DeviceLimitRegistry::new(config, Arc::new(SimulatedBackend::default()));
//!
//! let mb = 1 << 20;
//! let a = registry.allocate(0, 60 * mb, false).unwrap();
//! assert!(matches!(
//!     registry.allocate(0, 50 * mb, false),
//!     Err(AllocError::OutOfMemory { .. })
//! ));
//! registry.free(0, a, 60 * mb).unwrap();
//! assert_eq!(registry.recorded_size(0).unwrap(), 0);
//! ```

mod base_ptr;
mod config;
mod device_query;
mod error;
pub mod global;
mod recorded;
mod registry;
mod sizing;
mod stats;
#[cfg(test)]
mod test_util;
mod units;

pub use base_ptr::BasePointerIndex;
pub use config::AllocatorConfig;
pub use device_query::DeviceQuery;
pub use error::{AllocError, OomReason};
pub use recorded::{MemInfo, RecordedAllocator};
pub use registry::DeviceLimitRegistry;
pub use sizing::{SizingConfig, SizingPolicy, MIN_CHUNK_SIZE};
pub use stats::{DeviceMemoryStats, MemoryStatsSnapshot};
pub use units::{mb_to_bytes, ByteSize, MIB};
