// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Outstanding-address index for base-pointer lookups.
//!
//! Downstream allocators that coalesce sub-allocations need to map an
//! interior address back to the native block containing it. The index that
//! answers this is a diagnostic capability: it is compiled in under
//! `cfg(test)` or the `testing` feature. Other builds get a stub with the
//! same interface whose lookups fail with [`AllocError::Unimplemented`], so
//! call sites never branch on the build configuration.

#[cfg(any(test, feature = "testing"))]
mod imp {
    use crate::AllocError;
    use gpu_backend::DevicePtr;
    use std::collections::BTreeSet;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// Ordered set of outstanding native block addresses.
    #[derive(Debug, Default)]
    pub struct BasePointerIndex {
        addrs: Mutex<BTreeSet<DevicePtr>>,
    }

    impl BasePointerIndex {
        /// `true` when lookups are supported in this build.
        pub const ENABLED: bool = true;

        fn addrs(&self) -> MutexGuard<'_, BTreeSet<DevicePtr>> {
            self.addrs.lock().unwrap_or_else(PoisonError::into_inner)
        }

        pub fn insert(&self, ptr: DevicePtr) {
            self.addrs().insert(ptr);
        }

        pub fn remove(&self, ptr: DevicePtr) {
            self.addrs().remove(&ptr);
        }

        /// Largest recorded address `<= ptr`, or `None` below every block.
        pub fn base_of(&self, ptr: DevicePtr) -> Result<Option<DevicePtr>, AllocError> {
            Ok(self.addrs().range(..=ptr).next_back().copied())
        }

        pub fn len(&self) -> usize {
            self.addrs().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }
}

#[cfg(not(any(test, feature = "testing")))]
mod imp {
    use crate::AllocError;
    use gpu_backend::DevicePtr;

    /// Stand-in used when the diagnostic index is compiled out.
    #[derive(Debug, Default)]
    pub struct BasePointerIndex;

    impl BasePointerIndex {
        /// `true` when lookups are supported in this build.
        pub const ENABLED: bool = false;

        #[inline]
        pub fn insert(&self, _ptr: DevicePtr) {}

        #[inline]
        pub fn remove(&self, _ptr: DevicePtr) {}

        pub fn base_of(&self, _ptr: DevicePtr) -> Result<Option<DevicePtr>, AllocError> {
            Err(AllocError::Unimplemented("base pointer lookup"))
        }

        pub fn len(&self) -> usize {
            0
        }

        pub fn is_empty(&self) -> bool {
            true
        }
    }
}

pub use imp::BasePointerIndex;

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_backend::DevicePtr;

    fn p(addr: u64) -> DevicePtr {
        DevicePtr::new(addr)
    }

    #[test]
    fn test_exact_base() {
        let idx = BasePointerIndex::default();
        idx.insert(p(0x1000));
        idx.insert(p(0x2000));
        assert_eq!(idx.base_of(p(0x1000)).unwrap(), Some(p(0x1000)));
        assert_eq!(idx.base_of(p(0x2000)).unwrap(), Some(p(0x2000)));
    }

    #[test]
    fn test_interior_address_maps_to_lower_block() {
        let idx = BasePointerIndex::default();
        idx.insert(p(0x1000));
        idx.insert(p(0x2000));
        assert_eq!(idx.base_of(p(0x1800)).unwrap(), Some(p(0x1000)));
        assert_eq!(idx.base_of(p(0x9000)).unwrap(), Some(p(0x2000)));
    }

    #[test]
    fn test_below_all_blocks() {
        let idx = BasePointerIndex::default();
        assert_eq!(idx.base_of(p(0x500)).unwrap(), None);
        idx.insert(p(0x1000));
        assert_eq!(idx.base_of(p(0xfff)).unwrap(), None);
    }

    #[test]
    fn test_remove() {
        let idx = BasePointerIndex::default();
        idx.insert(p(0x1000));
        idx.insert(p(0x2000));
        idx.remove(p(0x2000));
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.base_of(p(0x2100)).unwrap(), Some(p(0x1000)));
        idx.remove(p(0x1000));
        assert!(idx.is_empty());
    }
}
