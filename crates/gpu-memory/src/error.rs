// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for recorded allocation.
//!
//! Recoverable conditions are [`AllocError`] values. Native driver failures
//! other than out-of-memory (and the driver unloading during `free`) are not
//! recoverable: allocator and counter state can no longer be trusted, so they
//! go through [`fatal`] instead.

use gpu_backend::DriverError;
use std::fmt;

/// Why an allocation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum OomReason {
    /// The soft limit check rejected the request before any device call.
    SoftLimit,
    /// The native allocation primitive reported out-of-memory.
    Device,
}

impl fmt::Display for OomReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OomReason::SoftLimit => write!(f, "soft memory limit reached"),
            OomReason::Device => write!(f, "device memory exhausted"),
        }
    }
}

/// Errors returned to callers of the recorded allocator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The allocation could not be satisfied. The caller may retry with a
    /// smaller size, evict cached blocks, or surface a resource error.
    #[error("out of memory on gpu {device_id}: requested {requested_bytes} bytes ({reason})")]
    OutOfMemory {
        device_id: i32,
        requested_bytes: usize,
        reason: OomReason,
    },

    /// The device ordinal does not name a device of this process.
    #[error("device id {device_id} is out of range: {device_count} gpu(s) available")]
    OutOfRange { device_id: i32, device_count: usize },

    /// A reservation size could not be satisfied from available memory.
    #[error(
        "not enough available gpu memory: reservation of {requested_bytes} bytes, \
         {available_bytes} available to allocate"
    )]
    ResourceExhausted {
        requested_bytes: usize,
        available_bytes: usize,
    },

    /// A diagnostic operation was called in a build without the diagnostic index.
    #[error("{0} requires the `testing` feature and must not be used in release builds")]
    Unimplemented(&'static str),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Terminates on an unexplained native failure.
///
/// Logs the device, operation and driver code, then panics. Release builds
/// are compiled with `panic = "abort"`, so this ends the process.
#[cold]
#[track_caller]
pub(crate) fn fatal(device_id: i32, op: &str, err: DriverError) -> ! {
    tracing::error!(
        device_id,
        op,
        code = err.code(),
        "unrecoverable gpu driver error: {err}"
    );
    panic!(
        "gpu {device_id}: {op} failed with driver error {err} (code {})",
        err.code()
    )
}
