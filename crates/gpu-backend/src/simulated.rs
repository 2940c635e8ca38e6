// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! An in-process device backend.
//!
//! [`SimulatedBackend`] behaves like a driver for one or more devices of
//! fixed capacity, without any hardware. It is the default backend when the
//! `cuda` feature is off and the test double for everything built on top of
//! [`Backend`](crate::Backend).
//!
//! Driver semantics it reproduces:
//! - the current device is per host thread (default `0`);
//! - allocate, free and memory queries act on the current device;
//! - every failing call also leaves a per-thread sticky error; the first
//!   failure sticks until [`take_last_error`](crate::MemoryBackend::take_last_error)
//!   clears it;
//! - once [`set_unloading`](SimulatedBackend::set_unloading) is on, `free`
//!   answers [`DriverError::Deinitialized`] like a driver during teardown.
//!
//! Failure injection (`fail_next_*`) and call counters let tests observe
//! exactly which native calls were made.
//!
//! Per-thread state lives in a thread-local slot keyed by backend instance.
//! A slot exists only while it differs from the default (device `0`, no
//! sticky error) and disappears with its thread.

use crate::{DeviceProperties, DevicePtr, DeviceRuntime, DriverError, MemoryBackend, PhysicalHandle};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Address-space stride between devices.
const DEVICE_ADDRESS_STRIDE: u64 = 1 << 40;
/// First address handed out on device 0.
const ADDRESS_BASE: u64 = 0x7f00_0000_0000;
/// Native allocations are aligned to this many bytes.
const ALLOCATION_ALIGNMENT: u64 = 256;

/// Simulated driver version (12.2).
const DRIVER_VERSION: i32 = 12020;
/// Simulated runtime version (12.1).
const RUNTIME_VERSION: i32 = 12010;

#[derive(Debug, Default)]
struct DeviceState {
    used_bytes: u64,
    next_addr: u64,
    live: HashMap<u64, u64>,
    handles: HashMap<u64, u64>,
    next_handle: u64,
}

#[derive(Debug)]
struct SimulatedDevice {
    properties: DeviceProperties,
    state: Mutex<DeviceState>,
    malloc_calls: AtomicUsize,
}

/// The calling thread's view of one backend instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ThreadSlot {
    current: i32,
    last_error: Option<DriverError>,
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static SLOTS: RefCell<HashMap<u64, ThreadSlot>> = RefCell::new(HashMap::new());
}

#[derive(Debug, Default)]
struct Injections {
    malloc: Option<DriverError>,
    free: Option<DriverError>,
    mem_info: Option<DriverError>,
}

/// A driver for simulated devices. See the module docs.
#[derive(Debug)]
pub struct SimulatedBackend {
    instance: u64,
    devices: Vec<SimulatedDevice>,
    injections: Mutex<Injections>,
    unloading: AtomicBool,
    device_count_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedBackend {
    /// Creates a backend with one device per properties record.
    pub fn new(properties: Vec<DeviceProperties>) -> Self {
        let devices = properties
            .into_iter()
            .enumerate()
            .map(|(id, properties)| SimulatedDevice {
                properties,
                state: Mutex::new(DeviceState {
                    next_addr: ADDRESS_BASE + id as u64 * DEVICE_ADDRESS_STRIDE,
                    next_handle: 1,
                    ..Default::default()
                }),
                malloc_calls: AtomicUsize::new(0),
            })
            .collect();

        Self {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            devices,
            injections: Mutex::new(Injections::default()),
            unloading: AtomicBool::new(false),
            device_count_calls: AtomicUsize::new(0),
        }
    }

    /// Creates identical simulated devices with the given capacities in bytes.
    pub fn with_capacities(capacities: &[u64]) -> Self {
        Self::new(
            capacities
                .iter()
                .enumerate()
                .map(|(id, &bytes)| DeviceProperties::simulated(format!("Simulated GPU {id}"), bytes))
                .collect(),
        )
    }

    /// Creates a single simulated device.
    pub fn single(capacity_bytes: u64) -> Self {
        Self::with_capacities(&[capacity_bytes])
    }

    /// Makes every subsequent `free` fail with [`DriverError::Deinitialized`].
    pub fn set_unloading(&self, unloading: bool) {
        self.unloading.store(unloading, Ordering::Release);
    }

    /// The next `malloc` on any device fails with `err`.
    pub fn fail_next_malloc(&self, err: DriverError) {
        lock(&self.injections).malloc = Some(err);
    }

    /// The next `free` on any device fails with `err`.
    pub fn fail_next_free(&self, err: DriverError) {
        lock(&self.injections).free = Some(err);
    }

    /// The next `mem_get_info` on any device fails with `err`.
    pub fn fail_next_mem_info(&self, err: DriverError) {
        lock(&self.injections).mem_info = Some(err);
    }

    /// Sets the calling thread's sticky error without failing a call.
    pub fn set_last_error(&self, err: DriverError) {
        self.with_slot(|slot| slot.last_error = Some(err));
    }

    /// Number of times [`DeviceRuntime::device_count`] has been called.
    pub fn device_count_calls(&self) -> usize {
        self.device_count_calls.load(Ordering::Acquire)
    }

    /// Number of native allocation attempts that reached `device_id`.
    pub fn malloc_calls(&self, device_id: i32) -> usize {
        self.device(device_id)
            .map(|d| d.malloc_calls.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Bytes currently held on `device_id` (blocks plus physical handles).
    pub fn used_bytes(&self, device_id: i32) -> u64 {
        self.device(device_id)
            .map(|d| lock(&d.state).used_bytes)
            .unwrap_or(0)
    }

    /// Number of live blocks on `device_id`.
    pub fn live_allocations(&self, device_id: i32) -> usize {
        self.device(device_id)
            .map(|d| lock(&d.state).live.len())
            .unwrap_or(0)
    }

    fn device(&self, device_id: i32) -> Option<&SimulatedDevice> {
        usize::try_from(device_id).ok().and_then(|i| self.devices.get(i))
    }

    /// Runs `f` on the calling thread's slot, dropping the slot again if it
    /// is back to the default.
    fn with_slot<R>(&self, f: impl FnOnce(&mut ThreadSlot) -> R) -> R {
        SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            let slot = slots.entry(self.instance).or_default();
            let out = f(slot);
            if *slot == ThreadSlot::default() {
                slots.remove(&self.instance);
            }
            out
        })
    }

    /// `true` if the calling thread holds non-default state for this backend.
    #[cfg(test)]
    fn has_thread_slot(&self) -> bool {
        SLOTS.with(|slots| slots.borrow().contains_key(&self.instance))
    }

    fn current_id(&self) -> i32 {
        SLOTS.with(|slots| {
            slots
                .borrow()
                .get(&self.instance)
                .map_or(0, |slot| slot.current)
        })
    }

    fn current(&self) -> Result<&SimulatedDevice, DriverError> {
        let id = self.current_id();
        self.device(id).ok_or(DriverError::InvalidDevice(id))
    }

    /// Returns `err`, recording it as the thread's sticky error unless an
    /// earlier one is still uncleared.
    fn fail<T>(&self, err: DriverError) -> Result<T, DriverError> {
        self.with_slot(|slot| {
            slot.last_error.get_or_insert(err);
        });
        Err(err)
    }
}

impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        // Other threads' slots go away when those threads exit.
        let _ = SLOTS.try_with(|slots| slots.borrow_mut().remove(&self.instance));
    }
}

impl Default for SimulatedBackend {
    /// One 16 GiB device.
    fn default() -> Self {
        Self::single(16 << 30)
    }
}

impl MemoryBackend for SimulatedBackend {
    fn malloc(&self, size: usize, managed: bool) -> Result<DevicePtr, DriverError> {
        let device = match self.current() {
            Ok(d) => d,
            Err(e) => return self.fail(e),
        };
        device.malloc_calls.fetch_add(1, Ordering::AcqRel);

        if let Some(err) = lock(&self.injections).malloc.take() {
            return self.fail(err);
        }
        if managed && !device.properties.managed_memory {
            return self.fail(DriverError::NotSupported);
        }
        if size == 0 {
            return Ok(DevicePtr::NULL);
        }

        let size = size as u64;
        let mut state = lock(&device.state);
        if state.used_bytes + size > device.properties.total_memory_bytes {
            drop(state);
            return self.fail(DriverError::OutOfMemory);
        }

        let addr = state.next_addr;
        state.next_addr += size.div_ceil(ALLOCATION_ALIGNMENT) * ALLOCATION_ALIGNMENT;
        state.used_bytes += size;
        state.live.insert(addr, size);
        Ok(DevicePtr::new(addr))
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), DriverError> {
        if self.unloading.load(Ordering::Acquire) {
            return self.fail(DriverError::Deinitialized);
        }
        if let Some(err) = lock(&self.injections).free.take() {
            return self.fail(err);
        }
        if ptr.is_null() {
            return Ok(());
        }

        let device = match self.current() {
            Ok(d) => d,
            Err(e) => return self.fail(e),
        };
        let mut state = lock(&device.state);
        match state.live.remove(&ptr.addr()) {
            Some(size) => {
                state.used_bytes -= size;
                Ok(())
            }
            None => {
                drop(state);
                self.fail(DriverError::InvalidValue)
            }
        }
    }

    fn mem_get_info(&self) -> Result<(usize, usize), DriverError> {
        if let Some(err) = lock(&self.injections).mem_info.take() {
            return self.fail(err);
        }
        let device = match self.current() {
            Ok(d) => d,
            Err(e) => return self.fail(e),
        };
        let total = device.properties.total_memory_bytes;
        let used = lock(&device.state).used_bytes;
        Ok(((total - used) as usize, total as usize))
    }

    fn take_last_error(&self) -> Option<DriverError> {
        self.with_slot(|slot| slot.last_error.take())
    }

    fn mem_create(&self, size: usize) -> Result<PhysicalHandle, DriverError> {
        let device = match self.current() {
            Ok(d) => d,
            Err(e) => return self.fail(e),
        };
        let size = size as u64;
        let mut state = lock(&device.state);
        if state.used_bytes + size > device.properties.total_memory_bytes {
            drop(state);
            return self.fail(DriverError::OutOfMemory);
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.used_bytes += size;
        state.handles.insert(handle, size);
        Ok(PhysicalHandle(handle))
    }

    fn mem_release(&self, handle: PhysicalHandle) -> Result<(), DriverError> {
        let device = match self.current() {
            Ok(d) => d,
            Err(e) => return self.fail(e),
        };
        let mut state = lock(&device.state);
        match state.handles.remove(&handle.0) {
            Some(size) => {
                state.used_bytes -= size;
                Ok(())
            }
            None => {
                drop(state);
                self.fail(DriverError::InvalidValue)
            }
        }
    }
}

impl DeviceRuntime for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn device_count(&self) -> Result<i32, DriverError> {
        self.device_count_calls.fetch_add(1, Ordering::AcqRel);
        Ok(self.devices.len() as i32)
    }

    fn current_device(&self) -> Result<i32, DriverError> {
        Ok(self.current_id())
    }

    fn set_device(&self, device_id: i32) -> Result<(), DriverError> {
        if self.device(device_id).is_none() {
            return self.fail(DriverError::InvalidDevice(device_id));
        }
        self.with_slot(|slot| slot.current = device_id);
        Ok(())
    }

    fn properties(&self, device_id: i32) -> Result<DeviceProperties, DriverError> {
        self.device(device_id)
            .map(|d| d.properties.clone())
            .ok_or(DriverError::InvalidDevice(device_id))
    }

    fn driver_version(&self) -> Result<i32, DriverError> {
        Ok(DRIVER_VERSION)
    }

    fn runtime_version(&self) -> Result<i32, DriverError> {
        Ok(RUNTIME_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malloc_and_free() {
        let b = SimulatedBackend::single(4096);
        let p = b.malloc(1000, false).unwrap();
        assert!(!p.is_null());
        assert_eq!(b.used_bytes(0), 1000);
        assert_eq!(b.mem_get_info().unwrap(), (3096, 4096));

        b.free(p).unwrap();
        assert_eq!(b.used_bytes(0), 0);
        assert_eq!(b.live_allocations(0), 0);
    }

    #[test]
    fn test_addresses_are_aligned_and_increasing() {
        let b = SimulatedBackend::single(1 << 20);
        let a = b.malloc(10, false).unwrap();
        let c = b.malloc(10, false).unwrap();
        assert_eq!(a.addr() % ALLOCATION_ALIGNMENT, 0);
        assert_eq!(c.addr() - a.addr(), ALLOCATION_ALIGNMENT);
    }

    #[test]
    fn test_out_of_memory_sets_sticky_error() {
        let b = SimulatedBackend::single(100);
        assert_eq!(b.malloc(101, false), Err(DriverError::OutOfMemory));
        assert_eq!(b.take_last_error(), Some(DriverError::OutOfMemory));
        assert_eq!(b.take_last_error(), None);
    }

    #[test]
    fn test_first_failure_sticks() {
        let b = SimulatedBackend::single(100);
        let _ = b.malloc(101, false);
        let _ = b.set_device(4);
        assert_eq!(b.take_last_error(), Some(DriverError::OutOfMemory));
    }

    #[test]
    fn test_thread_state_is_dropped_when_back_to_default() {
        let b = SimulatedBackend::with_capacities(&[1024, 1024]);
        assert!(!b.has_thread_slot());

        b.set_device(1).unwrap();
        assert!(b.has_thread_slot());
        b.set_device(0).unwrap();
        assert!(!b.has_thread_slot());

        let _ = b.malloc(4096, false);
        assert!(b.has_thread_slot());
        assert_eq!(b.take_last_error(), Some(DriverError::OutOfMemory));
        assert!(!b.has_thread_slot());
    }

    #[test]
    fn test_worker_threads_leave_no_state_behind() {
        let b = SimulatedBackend::with_capacities(&[1024, 1024]);
        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    b.set_device(1).unwrap();
                    assert_eq!(b.current_device().unwrap(), 1);
                    assert!(b.has_thread_slot());
                });
            }
        });
        assert_eq!(b.current_device().unwrap(), 0);
        assert!(!b.has_thread_slot());
    }

    #[test]
    fn test_instances_do_not_share_thread_state() {
        let a = SimulatedBackend::with_capacities(&[1024, 1024]);
        let b = SimulatedBackend::with_capacities(&[1024, 1024]);
        a.set_device(1).unwrap();
        assert_eq!(b.current_device().unwrap(), 0);
        drop(a);
        assert!(!b.has_thread_slot());
    }

    #[test]
    fn test_sticky_error_is_per_thread() {
        let b = SimulatedBackend::single(100);
        let _ = b.malloc(101, false);
        std::thread::scope(|s| {
            s.spawn(|| assert_eq!(b.take_last_error(), None));
        });
        assert_eq!(b.take_last_error(), Some(DriverError::OutOfMemory));
    }

    #[test]
    fn test_allocations_land_on_current_device() {
        let b = SimulatedBackend::with_capacities(&[1024, 1024]);
        b.set_device(1).unwrap();
        let p = b.malloc(64, false).unwrap();
        assert_eq!(b.used_bytes(1), 64);
        assert_eq!(b.used_bytes(0), 0);
        assert_eq!(b.malloc_calls(1), 1);

        // Freeing from the wrong device is rejected.
        b.set_device(0).unwrap();
        assert_eq!(b.free(p), Err(DriverError::InvalidValue));
        b.set_device(1).unwrap();
        b.free(p).unwrap();
    }

    #[test]
    fn test_current_device_is_per_thread() {
        let b = SimulatedBackend::with_capacities(&[1024, 1024]);
        b.set_device(1).unwrap();
        std::thread::scope(|s| {
            s.spawn(|| assert_eq!(b.current_device().unwrap(), 0));
        });
        assert_eq!(b.current_device().unwrap(), 1);
    }

    #[test]
    fn test_unloading_free() {
        let b = SimulatedBackend::single(1024);
        let p = b.malloc(64, false).unwrap();
        b.set_unloading(true);
        assert_eq!(b.free(p), Err(DriverError::Deinitialized));
        assert_eq!(b.take_last_error(), Some(DriverError::Deinitialized));
    }

    #[test]
    fn test_injection_is_one_shot() {
        let b = SimulatedBackend::single(1024);
        b.fail_next_malloc(DriverError::Other(700));
        assert_eq!(b.malloc(8, false), Err(DriverError::Other(700)));
        assert!(b.malloc(8, false).is_ok());
        assert_eq!(b.malloc_calls(0), 2);
    }

    #[test]
    fn test_managed_requires_support() {
        let mut props = DeviceProperties::simulated("no-uvm", 1024);
        props.managed_memory = false;
        let b = SimulatedBackend::new(vec![props]);
        assert_eq!(b.malloc(8, true), Err(DriverError::NotSupported));
    }

    #[test]
    fn test_physical_handles() {
        let b = SimulatedBackend::single(1024);
        let h = b.mem_create(512).unwrap();
        assert_eq!(b.used_bytes(0), 512);
        assert_eq!(b.mem_create(600), Err(DriverError::OutOfMemory));
        b.mem_release(h).unwrap();
        assert_eq!(b.used_bytes(0), 0);
        assert_eq!(b.mem_release(h), Err(DriverError::InvalidValue));
    }

    #[test]
    fn test_device_count_counter() {
        let b = SimulatedBackend::with_capacities(&[1, 2, 3]);
        assert_eq!(b.device_count().unwrap(), 3);
        assert_eq!(b.device_count().unwrap(), 3);
        assert_eq!(b.device_count_calls(), 2);
    }

    #[test]
    fn test_invalid_set_device() {
        let b = SimulatedBackend::single(1024);
        assert_eq!(b.set_device(-1), Err(DriverError::InvalidDevice(-1)));
        assert_eq!(b.properties(3), Err(DriverError::InvalidDevice(3)));
    }
}
