// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Native driver status codes.

/// A non-success status reported by a device driver primitive.
///
/// Only two codes have special meaning to callers: [`DriverError::OutOfMemory`]
/// (recoverable) and [`DriverError::Deinitialized`] (the driver is unloading
/// during process teardown). Everything else is treated as unrecoverable by
/// the recorded allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum DriverError {
    /// The device could not satisfy an allocation.
    #[error("out of memory")]
    OutOfMemory,

    /// The driver is shutting down (or was never initialised).
    #[error("driver is deinitialized or unloading")]
    Deinitialized,

    /// The device ordinal does not name a visible device.
    #[error("invalid device ordinal {0}")]
    InvalidDevice(i32),

    /// An argument (usually a pointer) was not valid for the primitive.
    #[error("invalid value")]
    InvalidValue,

    /// The backend does not implement this primitive.
    #[error("operation not supported by this backend")]
    NotSupported,

    /// Any other vendor-specific code.
    #[error("driver error code {0}")]
    Other(i32),
}

impl DriverError {
    /// Numeric code, following the CUDA driver API numbering where one exists.
    pub fn code(&self) -> i32 {
        match self {
            DriverError::OutOfMemory => 2,
            DriverError::Deinitialized => 4,
            DriverError::InvalidDevice(_) => 101,
            DriverError::InvalidValue => 1,
            DriverError::NotSupported => 801,
            DriverError::Other(code) => *code,
        }
    }

    /// Returns `true` for the recoverable out-of-memory code.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, DriverError::OutOfMemory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(DriverError::OutOfMemory.code(), 2);
        assert_eq!(DriverError::Deinitialized.code(), 4);
        assert_eq!(DriverError::Other(999).code(), 999);
    }

    #[test]
    fn test_display() {
        assert_eq!(DriverError::InvalidDevice(7).to_string(), "invalid device ordinal 7");
        assert!(DriverError::Deinitialized.to_string().contains("unloading"));
    }

    #[test]
    fn test_is_out_of_memory() {
        assert!(DriverError::OutOfMemory.is_out_of_memory());
        assert!(!DriverError::InvalidValue.is_out_of_memory());
    }
}
