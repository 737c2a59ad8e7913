// SPDX-License-Identifier: Apache-2.0 OR MIT
// Bounded record pool: lock-free fast paths, mutex-serialized growth
//
// Acquisition ladder: the calling thread's private cache chunk, then a
// bounded round-robin scan of the shared chunks, then the growth path under
// the chunk mutex.

use std::cell::{RefCell, UnsafeCell};
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use arc_swap::ArcSwap;

use crate::record::{Record, RecordState};

/// Slots in the first shared chunk; each new chunk doubles the last.
pub const INITIAL_CHUNK_SLOTS: usize = 1024;
/// Slots probed per chunk on the shared scan before moving on.
const SCAN_LIMIT: usize = 16;
/// Slots in each per-thread cache chunk.
const THREAD_CACHE_SLOTS: usize = 64;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_CACHES: RefCell<Vec<ThreadCache>> = const { RefCell::new(Vec::new()) };
}

/// A block of record slots with a parallel claim-flag array.
struct Chunk {
    records: Box<[UnsafeCell<Record>]>,
    used: Box<[AtomicBool]>,
}

// SAFETY: a slot's record is only mutated by the thread holding its claim
// (`used[i]` CAS false -> true with acquire, cleared with release) or by the
// last reference holder during finalize; every other access is a shared
// read while the record is Active.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    fn new(slots: usize) -> Self {
        let records: Vec<UnsafeCell<Record>> =
            (0..slots).map(|_| UnsafeCell::new(Record::new())).collect();
        let used: Vec<AtomicBool> = (0..slots).map(|_| AtomicBool::new(false)).collect();
        Self {
            records: records.into_boxed_slice(),
            used: used.into_boxed_slice(),
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    /// Claim slot `i`; acquire pairs with the release in `release_slot`
    fn try_claim(&self, i: usize) -> bool {
        self.used[i]
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn slot_ptr(&self, i: usize) -> NonNull<Record> {
        // SAFETY: `i` is in bounds; UnsafeCell::get never returns null.
        unsafe { NonNull::new_unchecked(self.records[i].get()) }
    }

    /// Slot index of `ptr`, computed by pointer arithmetic
    fn index_of(&self, ptr: NonNull<Record>) -> Option<usize> {
        let base = self.records.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        let slot_size = std::mem::size_of::<UnsafeCell<Record>>();
        if addr < base {
            return None;
        }
        let offset = addr - base;
        let index = offset / slot_size;
        (offset % slot_size == 0 && index < self.records.len()).then_some(index)
    }

    /// Make the slot claimable again; release publishes the reset record
    fn release_slot(&self, i: usize) {
        self.used[i].store(false, Ordering::Release);
    }

    fn is_unused(&self) -> bool {
        self.used.iter().all(|u| !u.load(Ordering::Acquire))
    }
}

/// A thread's private cache chunk. Parked on the pool's adoption list when
/// the thread exits so the slots (and any records still referenced) survive.
struct ThreadCache {
    pool_id: u64,
    pool: Weak<RecordPool>,
    chunk: Arc<Chunk>,
}

impl Drop for ThreadCache {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.parked_caches
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(Arc::clone(&self.chunk));
        }
    }
}

/// Pool of reusable record slots.
///
/// All hot-path operations are lock-free; only chunk growth and shrink take
/// the chunk mutex. `size` counts Active/Releasing records (including those
/// in thread caches); `capacity` counts shared chunk slots only.
pub struct RecordPool {
    chunks: ArcSwap<Vec<Arc<Chunk>>>,
    chunk_lock: Mutex<()>,
    parked_caches: Mutex<Vec<Arc<Chunk>>>,
    size: AtomicUsize,
    capacity: AtomicUsize,
    peak: AtomicUsize,
    next_chunk: AtomicUsize,
    max_capacity: usize,
    id: u64,
}

impl RecordPool {
    /// Unbounded pool with the default initial chunk
    pub fn new() -> Arc<Self> {
        Self::with_limits(INITIAL_CHUNK_SLOTS, usize::MAX)
    }

    /// Pool that refuses to grow past `max_capacity` slots. Acquisition
    /// beyond the bound returns `None` and the producer counts a drop.
    pub fn bounded(initial_slots: usize, max_capacity: usize) -> Arc<Self> {
        Self::with_limits(initial_slots.max(1), max_capacity)
    }

    fn with_limits(initial_slots: usize, max_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            chunks: ArcSwap::from_pointee(vec![Arc::new(Chunk::new(initial_slots))]),
            chunk_lock: Mutex::new(()),
            parked_caches: Mutex::new(Vec::new()),
            size: AtomicUsize::new(0),
            capacity: AtomicUsize::new(initial_slots),
            peak: AtomicUsize::new(0),
            next_chunk: AtomicUsize::new(0),
            max_capacity,
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Acquire an Active record with `ref_count == 1`, or `None` when a
    /// bounded pool is saturated.
    pub fn acquire(self: &Arc<Self>) -> Option<RecordRef> {
        // FAST PATH: the calling thread's cache chunk, contention-free.
        if let Some(record) = self.acquire_from_thread_cache() {
            return Some(record);
        }

        // MEDIUM PATH: bounded scan of the shared chunks, starting at a
        // round-robin chunk to spread contention.
        let table = self.chunks.load();
        let chunks = table.as_slice();
        let start = self.next_chunk.fetch_add(1, Ordering::Relaxed) % chunks.len();
        for i in 0..chunks.len() {
            let chunk = &chunks[(start + i) % chunks.len()];
            let limit = chunk.len().min(SCAN_LIMIT);
            for slot in 0..limit {
                if chunk.try_claim(slot) {
                    return Some(self.activate(chunk, slot));
                }
            }
        }
        drop(table);

        // SLOW PATH: rescan and grow under the chunk mutex.
        self.acquire_slow()
    }

    fn acquire_from_thread_cache(self: &Arc<Self>) -> Option<RecordRef> {
        let chunk = THREAD_CACHES.with(|caches| {
            let mut caches = caches.borrow_mut();
            if let Some(cache) = caches.iter().find(|c| c.pool_id == self.id) {
                return Some(Arc::clone(&cache.chunk));
            }
            let chunk = self.adopt_or_create_cache()?;
            caches.push(ThreadCache {
                pool_id: self.id,
                pool: Arc::downgrade(self),
                chunk: Arc::clone(&chunk),
            });
            Some(chunk)
        })?;

        for slot in 0..chunk.len() {
            if chunk.try_claim(slot) {
                return Some(self.activate(&chunk, slot));
            }
        }
        None
    }

    fn adopt_or_create_cache(&self) -> Option<Arc<Chunk>> {
        if let Some(chunk) = self
            .parked_caches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
        {
            return Some(chunk);
        }
        // Cache slots count against a bounded pool's ceiling.
        let capacity = self.capacity.load(Ordering::Relaxed);
        if capacity.saturating_add(THREAD_CACHE_SLOTS) > self.max_capacity {
            return None;
        }
        Some(Arc::new(Chunk::new(THREAD_CACHE_SLOTS)))
    }

    fn acquire_slow(self: &Arc<Self>) -> Option<RecordRef> {
        let _guard = self.chunk_lock.lock().unwrap_or_else(|e| e.into_inner());

        // Another thread may have released or grown while we waited.
        if let Some(record) = self.acquire_from_thread_cache() {
            return Some(record);
        }
        let table = self.chunks.load_full();
        for chunk in table.iter() {
            for slot in 0..chunk.len() {
                if chunk.try_claim(slot) {
                    return Some(self.activate(chunk, slot));
                }
            }
        }

        // Everything is saturated: append a chunk twice the size of the last.
        let last_size = table.last().map(|chunk| chunk.len()).unwrap_or(INITIAL_CHUNK_SLOTS);
        let new_slots = last_size.saturating_mul(2);
        let capacity = self.capacity.load(Ordering::Relaxed);
        if capacity.saturating_add(new_slots) > self.max_capacity {
            return None;
        }

        let chunk = Arc::new(Chunk::new(new_slots));
        let claimed = chunk.try_claim(0);
        debug_assert!(claimed);

        let mut new_table = (*table).clone();
        new_table.push(Arc::clone(&chunk));
        self.chunks.store(Arc::new(new_table));
        self.capacity.fetch_add(new_slots, Ordering::Release);

        Some(self.activate(&chunk, 0))
    }

    fn activate(self: &Arc<Self>, chunk: &Arc<Chunk>, slot: usize) -> RecordRef {
        let size = self.size.fetch_add(1, Ordering::Relaxed) + 1;
        // Statistics only; a stale peak read is acceptable.
        if size > self.peak.load(Ordering::Relaxed) {
            self.peak.store(size, Ordering::Relaxed);
        }

        let ptr = chunk.slot_ptr(slot);
        // SAFETY: the slot claim grants exclusive access; release publishes
        // the Active state and initial reference to other threads.
        unsafe {
            let record = ptr.as_ptr();
            (*record).state.store(RecordState::Active.as_u8(), Ordering::Release);
            (*record).ref_count.store(1, Ordering::Release);
        }

        RecordRef {
            ptr,
            chunk: Arc::clone(chunk),
            pool: Arc::clone(self),
        }
    }

    /// Mark an Active record Releasing. The drop that brings the reference
    /// count to zero completes the return to the pool, so `release` on a
    /// sole-handle record pools it as soon as that handle drops.
    pub fn release(&self, record: &RecordRef) {
        let _ = record.record().state.compare_exchange(
            RecordState::Active.as_u8(),
            RecordState::Releasing.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Complete the Releasing -> Pooled transition. Called by the last
    /// reference holder, which has exclusive access to the record.
    fn finalize_release(&self, ptr: NonNull<Record>, chunk: &Chunk) {
        let Some(index) = chunk.index_of(ptr) else {
            return;
        };

        // SAFETY: ref_count reached zero, so no other reference exists; the
        // release in `release_slot` publishes the reset to the next claimant.
        unsafe {
            let record = &mut *ptr.as_ptr();
            if record.state.load(Ordering::Acquire) != RecordState::Releasing.as_u8() {
                return;
            }
            record.reset();
            record.ref_count.store(0, Ordering::Release);
            record.state.store(RecordState::Pooled.as_u8(), Ordering::Release);
        }

        chunk.release_slot(index);
        self.size.fetch_sub(1, Ordering::Relaxed);
    }

    /// Drop all-unused tail chunks while `size/capacity` is below
    /// `threshold` (a fraction). The initial chunk is never dropped.
    pub fn try_shrink(&self, threshold: f32) {
        let _guard = self.chunk_lock.lock().unwrap_or_else(|e| e.into_inner());

        loop {
            let capacity = self.capacity.load(Ordering::Relaxed);
            let size = self.size.load(Ordering::Relaxed);
            if capacity == 0 || size as f32 / capacity as f32 >= threshold {
                return;
            }

            let table = self.chunks.load_full();
            if table.len() <= 1 {
                return;
            }
            let last = table.last().expect("chunk table cannot be empty");
            if !last.is_unused() {
                return;
            }

            let removed = last.len();
            let mut new_table = (*table).clone();
            new_table.pop();
            self.chunks.store(Arc::new(new_table));
            self.capacity.fetch_sub(removed, Ordering::Relaxed);
        }
    }

    /// Records currently Active or Releasing
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Total shared chunk slots (thread caches excluded)
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    pub fn peak_usage(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn usage_percentage(&self) -> f32 {
        let capacity = self.capacity();
        if capacity == 0 {
            return 0.0;
        }
        self.size() as f32 / capacity as f32 * 100.0
    }
}

impl fmt::Debug for RecordPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordPool")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("peak", &self.peak_usage())
            .finish()
    }
}

/// Reference-counted handle to a pooled record.
///
/// Cloning adds a reference; dropping removes one. The drop that takes the
/// count to zero while the record is Releasing returns the slot to the pool.
/// The handle pins its owning chunk, so a shrunk chunk cannot vanish under
/// a live record.
pub struct RecordRef {
    ptr: NonNull<Record>,
    chunk: Arc<Chunk>,
    pool: Arc<RecordPool>,
}

// SAFETY: the pointed-to record outlives the handle (the handle holds its
// chunk), and shared access after enqueue is read-only; mutation goes
// through the `&mut self` accessor while the producer holds the only handle.
unsafe impl Send for RecordRef {}
unsafe impl Sync for RecordRef {}

impl RecordRef {
    pub(crate) fn record(&self) -> &Record {
        // SAFETY: the slot stays claimed while any handle exists.
        unsafe { self.ptr.as_ref() }
    }

    /// Exclusive access for filling fields between acquire and enqueue
    pub(crate) fn record_mut(&mut self) -> &mut Record {
        debug_assert_eq!(self.record().ref_count.load(Ordering::Relaxed), 1);
        // SAFETY: with a single live handle the producer has exclusive
        // access; `&mut self` prevents aliasing through this handle.
        unsafe { self.ptr.as_mut() }
    }

    pub fn pool(&self) -> &Arc<RecordPool> {
        &self.pool
    }
}

impl Deref for RecordRef {
    type Target = Record;

    fn deref(&self) -> &Record {
        self.record()
    }
}

impl Clone for RecordRef {
    fn clone(&self) -> Self {
        self.record().ref_count.fetch_add(1, Ordering::AcqRel);
        Self {
            ptr: self.ptr,
            chunk: Arc::clone(&self.chunk),
            pool: Arc::clone(&self.pool),
        }
    }
}

impl Drop for RecordRef {
    fn drop(&mut self) {
        let previous = self.record().ref_count.fetch_sub(1, Ordering::AcqRel);
        if previous == 1
            && self.record().state.load(Ordering::Acquire) == RecordState::Releasing.as_u8()
        {
            self.pool.finalize_release(self.ptr, &self.chunk);
        }
    }
}

impl fmt::Debug for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.record();
        f.debug_struct("RecordRef")
            .field("state", &record.state())
            .field("level", &record.level())
            .field("message", &record.message())
            .finish()
    }
}
