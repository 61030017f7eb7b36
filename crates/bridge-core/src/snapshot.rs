//! Snapshot store: the single latest-value record written to a named shared
//! memory region once per host tick, read by both the in-process transports
//! and, potentially, other local processes mapping the same region.
//!
//! Layout of the mapped region:
//!
//! ```text
//! offset 0:  timestamp_us   (u64)
//! offset 8:  data_valid     (u32)
//! offset 12: update_counter (u32)
//! offset 16: reserved       (u32)
//! offset 20: pad            (u32)
//! offset 24: f64[capacity]  (the scalar value array, catalog index order)
//! ```
//!
//! Readers use a seqlock-style protocol: `data_valid` is driven to 0 before
//! the value array is touched and back to 1 once the write completes, and a
//! reader re-checks it after copying the array out. There is no blocking on
//! either side — a reader that observes an in-progress write simply reports
//! `SnapshotError::Updating` rather than waiting, matching the "latest
//! value only, no guaranteed delivery" nature of this store.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use shared_memory::{Shmem, ShmemConf};

use crate::catalog::HEADER_SIZE_BYTES;
use crate::errors::SnapshotError;

const MAX_READ_RETRIES: u32 = 4;

pub struct SnapshotStore {
    shmem: Shmem,
    capacity: u32,
}

// SAFETY: `Shmem` wraps a raw pointer into a memory-mapped region and is not
// `Send`/`Sync` by default. Every access in this module goes through atomic
// operations on the header and a full-copy read of the value array, so
// concurrent access from multiple threads in this process is as safe as
// concurrent access from another process mapping the same region.
unsafe impl Send for SnapshotStore {}
unsafe impl Sync for SnapshotStore {}

impl SnapshotStore {
    /// Creates and zero-initializes a new named region sized for `capacity`
    /// scalar variables.
    pub fn create(os_id: &str, capacity: u32) -> Result<Self, SnapshotError> {
        let size = HEADER_SIZE_BYTES as usize + capacity as usize * 8;
        let shmem = ShmemConf::new()
            .size(size)
            .os_id(os_id)
            .create()
            .map_err(|e| SnapshotError::MappingUnavailable(e.to_string()))?;
        let store = Self { shmem, capacity };
        store.zero_fill();
        Ok(store)
    }

    /// Opens an existing named region created elsewhere (a separate reader
    /// process, or a second handle within this process in tests).
    pub fn open(os_id: &str, capacity: u32) -> Result<Self, SnapshotError> {
        let shmem = ShmemConf::new()
            .os_id(os_id)
            .open()
            .map_err(|e| SnapshotError::MappingUnavailable(e.to_string()))?;
        Ok(Self { shmem, capacity })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn zero_fill(&self) {
        // SAFETY: `self.shmem` owns `size` bytes starting at `as_ptr()` for
        // the lifetime of this struct.
        unsafe {
            std::ptr::write_bytes(self.shmem.as_ptr(), 0, self.shmem.len());
        }
    }

    fn timestamp_ptr(&self) -> *const AtomicU64 {
        self.shmem.as_ptr().cast::<AtomicU64>()
    }

    fn data_valid_ptr(&self) -> *const AtomicU32 {
        // SAFETY: offset 8 is within the mapped region's header for any
        // region sized via `HEADER_SIZE_BYTES`.
        unsafe { self.shmem.as_ptr().add(8).cast::<AtomicU32>() }
    }

    fn update_counter_ptr(&self) -> *const AtomicU32 {
        unsafe { self.shmem.as_ptr().add(12).cast::<AtomicU32>() }
    }

    fn values_ptr(&self) -> *mut f64 {
        unsafe { self.shmem.as_ptr().add(HEADER_SIZE_BYTES as usize).cast::<f64>() }
    }

    /// Begins a write. Drives `data_valid` to 0 for the duration of the
    /// returned guard; dropping the guard restores it to 1 and bumps
    /// `update_counter` and `timestamp_us`.
    pub fn begin_write(&self, timestamp_us: u64) -> WriteGuard<'_> {
        // SAFETY: pointers are valid for the lifetime of `self`.
        unsafe { (*self.data_valid_ptr()).store(0, Ordering::Release) };
        WriteGuard { store: self, timestamp_us }
    }

    /// Writes a single scalar value at `offset` bytes into the region. Must
    /// only be called between `begin_write` and the guard's drop.
    pub fn write_scalar(&self, offset: u32, value: f64) -> Result<(), SnapshotError> {
        let index = (offset - HEADER_SIZE_BYTES) / 8;
        if index >= self.capacity {
            return Err(SnapshotError::OutOfRange(index));
        }
        // SAFETY: bounds-checked above; caller holds the write guard so no
        // reader-visible `data_valid == 1` window overlaps this write.
        unsafe { self.values_ptr().add(index as usize).write(value) };
        Ok(())
    }

    /// Takes a consistent point-in-time copy of the header and value array.
    /// Retries a bounded number of times if a write is observed in
    /// progress, then gives up rather than blocking the caller.
    pub fn read(&self) -> Result<ReadView, SnapshotError> {
        for _ in 0..MAX_READ_RETRIES {
            // SAFETY: pointers are valid for the lifetime of `self`.
            let before = unsafe { (*self.data_valid_ptr()).load(Ordering::Acquire) };
            if before == 0 {
                continue;
            }
            let timestamp_us = unsafe { (*self.timestamp_ptr()).load(Ordering::Acquire) };
            let update_counter = unsafe { (*self.update_counter_ptr()).load(Ordering::Acquire) };
            let mut values = vec![0.0_f64; self.capacity as usize];
            unsafe {
                std::ptr::copy_nonoverlapping(self.values_ptr(), values.as_mut_ptr(), values.len());
            }
            let after = unsafe { (*self.data_valid_ptr()).load(Ordering::Acquire) };
            if after == 1 {
                return Ok(ReadView { timestamp_us, update_counter, values });
            }
        }
        Err(SnapshotError::Updating)
    }
}

pub struct WriteGuard<'a> {
    store: &'a SnapshotStore,
    timestamp_us: u64,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: pointers are valid for the lifetime of `self.store`.
        unsafe {
            (*self.store.timestamp_ptr()).store(self.timestamp_us, Ordering::Release);
            (*self.store.update_counter_ptr()).fetch_add(1, Ordering::AcqRel);
            (*self.store.data_valid_ptr()).store(1, Ordering::Release);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadView {
    pub timestamp_us: u64,
    pub update_counter: u32,
    pub values: Vec<f64>,
}

impl ReadView {
    pub fn get(&self, index: u32) -> Option<f64> {
        self.values.get(index as usize).copied()
    }
}
