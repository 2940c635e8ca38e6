// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reservation sizing for higher-level allocators.
//!
//! A caching allocator sitting on top of the recorded allocator asks
//! [`SizingPolicy`] how large its first reservation and each growth step
//! should be. Both are either a fixed MiB override or a fraction of what is
//! currently *available to allocate* on the device, read live through
//! [`RecordedAllocator::mem_info`] so the soft limit is respected.

use crate::{AllocError, AllocatorConfig, RecordedAllocator};

/// Smallest block worth reserving; availability below this counts as none.
pub const MIN_CHUNK_SIZE: usize = 1 << 8;

/// Share of available memory always left to the driver and other tenants.
const RESERVE_FRACTION: f64 = 0.05;

/// The configuration subset that drives sizing.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SizingConfig {
    pub fraction_of_memory_to_use: f64,
    pub initial_reserve_mb: u64,
    pub growth_reserve_mb: u64,
}

impl From<&AllocatorConfig> for SizingConfig {
    fn from(config: &AllocatorConfig) -> Self {
        Self {
            fraction_of_memory_to_use: config.fraction_of_memory_to_use,
            initial_reserve_mb: config.initial_reserve_mb,
            growth_reserve_mb: config.growth_reserve_mb,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Reserve {
    Initial,
    Growth,
}

/// Computes reservation sizes for one device.
#[derive(Debug)]
pub struct SizingPolicy<'a> {
    allocator: &'a RecordedAllocator,
    config: SizingConfig,
}

impl<'a> SizingPolicy<'a> {
    pub fn new(allocator: &'a RecordedAllocator, config: SizingConfig) -> Self {
        Self { allocator, config }
    }

    /// Bytes a new reservation may use right now: limit-clamped available
    /// memory minus a 5% safety margin, or `0` if that is below
    /// [`MIN_CHUNK_SIZE`].
    pub fn available_to_alloc(&self) -> usize {
        let available = self.allocator.mem_info().available;
        let reserving = (RESERVE_FRACTION * available as f64) as usize;
        let to_alloc = available.saturating_sub(reserving);
        if to_alloc < MIN_CHUNK_SIZE {
            0
        } else {
            to_alloc
        }
    }

    /// Size of the first reservation.
    pub fn initial_reserve(&self) -> Result<usize, AllocError> {
        self.reserve(Reserve::Initial)
    }

    /// Size of each subsequent reservation.
    pub fn growth_reserve(&self) -> Result<usize, AllocError> {
        self.reserve(Reserve::Growth)
    }

    /// The larger of the initial and growth reservations.
    pub fn max_alloc_size(&self) -> Result<usize, AllocError> {
        Ok(self.initial_reserve()?.max(self.growth_reserve()?))
    }

    /// Largest single block a higher-level allocator should request.
    pub fn max_chunk_size(&self) -> Result<usize, AllocError> {
        let size = self.max_alloc_size()?;
        tracing::debug!(
            device_id = self.allocator.device_id(),
            "max chunk size {} MiB",
            size >> 20
        );
        Ok(size)
    }

    pub fn min_chunk_size(&self) -> usize {
        MIN_CHUNK_SIZE
    }

    fn reserve(&self, kind: Reserve) -> Result<usize, AllocError> {
        let available = self.available_to_alloc();
        let override_mb = match kind {
            Reserve::Initial => self.config.initial_reserve_mb,
            Reserve::Growth => self.config.growth_reserve_mb,
        };

        let bytes = if override_mb > 0 {
            usize::try_from(override_mb)
                .ok()
                .and_then(|mb| mb.checked_mul(1 << 20))
                .unwrap_or(usize::MAX)
        } else {
            (available as f64 * self.config.fraction_of_memory_to_use) as usize
        };

        if available == 0 || bytes > available {
            return Err(AllocError::ResourceExhausted {
                requested_bytes: bytes,
                available_bytes: available,
            });
        }

        tracing::debug!(
            device_id = self.allocator.device_id(),
            "{kind:?} reserve is {} MiB",
            bytes >> 20
        );
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_backend::SimulatedBackend;
    use std::sync::Arc;

    const MB: usize = 1 << 20;

    fn allocator(capacity: usize, limit: usize) -> RecordedAllocator {
        RecordedAllocator::new(0, limit as u64, Arc::new(SimulatedBackend::single(capacity as u64)))
    }

    fn config(fraction: f64, initial_mb: u64, growth_mb: u64) -> SizingConfig {
        SizingConfig {
            fraction_of_memory_to_use: fraction,
            initial_reserve_mb: initial_mb,
            growth_reserve_mb: growth_mb,
        }
    }

    #[test]
    fn test_available_to_alloc_keeps_margin() {
        let a = allocator(1000 * MB, 0);
        let policy = SizingPolicy::new(&a, config(0.5, 0, 0));
        assert_eq!(policy.available_to_alloc(), 950 * MB);
    }

    #[test]
    fn test_available_to_alloc_respects_limit() {
        let a = allocator(1000 * MB, 200 * MB);
        let _p = a.allocate(100 * MB, false).unwrap();
        let policy = SizingPolicy::new(&a, config(0.5, 0, 0));
        assert_eq!(policy.available_to_alloc(), 95 * MB);
    }

    #[test]
    fn test_tiny_availability_counts_as_zero() {
        let a = allocator(200, 0);
        let policy = SizingPolicy::new(&a, config(0.5, 0, 0));
        assert_eq!(policy.available_to_alloc(), 0);
        assert!(matches!(
            policy.initial_reserve(),
            Err(AllocError::ResourceExhausted { available_bytes: 0, .. })
        ));
    }

    #[test]
    fn test_fraction_based_reserve() {
        let a = allocator(1000 * MB, 0);
        let policy = SizingPolicy::new(&a, config(0.5, 0, 0));
        assert_eq!(policy.initial_reserve().unwrap(), 475 * MB);
        assert_eq!(policy.growth_reserve().unwrap(), 475 * MB);
    }

    #[test]
    fn test_fixed_overrides() {
        let a = allocator(1000 * MB, 0);
        let policy = SizingPolicy::new(&a, config(0.5, 64, 16));
        assert_eq!(policy.initial_reserve().unwrap(), 64 * MB);
        assert_eq!(policy.growth_reserve().unwrap(), 16 * MB);
        assert_eq!(policy.max_chunk_size().unwrap(), 64 * MB);
    }

    #[test]
    fn test_max_chunk_is_larger_of_the_two() {
        let a = allocator(1000 * MB, 0);
        let policy = SizingPolicy::new(&a, config(0.1, 0, 200));
        // 10% of 950 MiB is 95 MiB, below the 200 MiB growth override.
        assert_eq!(policy.max_alloc_size().unwrap(), 200 * MB);
    }

    #[test]
    fn test_override_larger_than_available() {
        let a = allocator(100 * MB, 0);
        let policy = SizingPolicy::new(&a, config(0.5, 500, 0));
        assert_eq!(
            policy.initial_reserve(),
            Err(AllocError::ResourceExhausted {
                requested_bytes: 500 * MB,
                available_bytes: 95 * MB,
            })
        );
        assert!(policy.max_chunk_size().is_err());
    }

    #[test]
    fn test_fraction_above_one_is_rejected() {
        let a = allocator(100 * MB, 0);
        let policy = SizingPolicy::new(&a, config(1.5, 0, 0));
        assert!(matches!(
            policy.growth_reserve(),
            Err(AllocError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn test_from_allocator_config() {
        let c = AllocatorConfig {
            fraction_of_memory_to_use: 0.3,
            initial_reserve_mb: 7,
            growth_reserve_mb: 9,
            ..Default::default()
        };
        assert_eq!(SizingConfig::from(&c), config(0.3, 7, 9));
    }
}
