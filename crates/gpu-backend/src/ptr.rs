// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Raw device addresses.

use std::fmt;

/// An address in device (or unified) memory.
///
/// This is a plain value: it carries no ownership and is never dereferenced
/// on the host. Ownership of the block behind it belongs to whichever
/// higher-level allocator requested it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct DevicePtr(u64);

impl DevicePtr {
    /// The null address.
    pub const NULL: DevicePtr = DevicePtr(0);

    /// Wraps a raw address.
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw address.
    pub const fn addr(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the address `bytes` past this one.
    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Debug for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePtr({:#x})", self.0)
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opaque handle to a physical allocation created through the virtual
/// memory management primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalHandle(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null() {
        assert!(DevicePtr::NULL.is_null());
        assert!(!DevicePtr::new(0x1000).is_null());
    }

    #[test]
    fn test_ordering_and_offset() {
        let base = DevicePtr::new(0x1000);
        let inner = base.offset(0x20);
        assert!(base < inner);
        assert_eq!(inner.addr(), 0x1020);
    }

    #[test]
    fn test_formatting() {
        let p = DevicePtr::new(0xdead_beef);
        assert_eq!(p.to_string(), "0xdeadbeef");
        assert_eq!(format!("{p:?}"), "DevicePtr(0xdeadbeef)");
    }
}
