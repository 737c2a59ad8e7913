// SPDX-License-Identifier: Apache-2.0 OR MIT
// Sharded lock-free logger registry

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::hazard::{HazardDomain, HazardGuard};
use crate::logger::Logger;

/// Shard count; power of two so the hash maps with a mask.
const NUM_SHARDS: usize = 256;

struct Entry {
    name: String,
    logger: Arc<Logger>,
    next: AtomicPtr<Entry>,
}

/// Concurrent read-optimized map from logger name to logger.
///
/// Each shard head is an atomic pointer to a singly-linked entry chain.
/// Lookups walk the chain under hazard protection; inserts CAS-push at the
/// head; removes CAS-unlink and retire the node through the hazard domain.
pub struct Registry {
    shards: Box<[AtomicPtr<Entry>]>,
    domain: Arc<HazardDomain>,
}

impl Registry {
    pub fn new(domain: Arc<HazardDomain>) -> Self {
        let shards: Vec<AtomicPtr<Entry>> = (0..NUM_SHARDS)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        Self {
            shards: shards.into_boxed_slice(),
            domain,
        }
    }

    /// FNV-1a 64-bit with a final xor-shift for avalanche
    fn shard_index(name: &str) -> usize {
        const FNV_OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

        let mut hash = FNV_OFFSET_BASIS;
        for byte in name.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash ^= hash >> 32;
        (hash as usize) & (NUM_SHARDS - 1)
    }

    /// Look up a logger by exact name
    pub fn find(&self, name: &str) -> Result<Option<Arc<Logger>>> {
        if name.is_empty() {
            return Ok(None);
        }
        let shard = &self.shards[Self::shard_index(name)];

        'restart: loop {
            let mut prev: *mut Entry = ptr::null_mut();
            let mut _prev_guard: Option<HazardGuard> = None;
            let mut current = shard.load(Ordering::Acquire);

            while !current.is_null() {
                let guard = self.domain.protect(current)?;
                // Re-read the link we followed; if it moved, the protection
                // raced a writer and the walk restarts.
                let source = if prev.is_null() {
                    shard.load(Ordering::Acquire)
                } else {
                    // SAFETY: `prev` is still protected by `_prev_guard`.
                    unsafe { (*prev).next.load(Ordering::Acquire) }
                };
                if source != current {
                    continue 'restart;
                }

                // SAFETY: protected and validated above.
                let entry = unsafe { &*current };
                if entry.name == name {
                    return Ok(Some(Arc::clone(&entry.logger)));
                }

                let next = entry.next.load(Ordering::Acquire);
                prev = current;
                _prev_guard = Some(guard);
                current = next;
            }
            return Ok(None);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        matches!(self.find(name), Ok(Some(_)))
    }

    /// Push a new entry at the shard head. Duplicate names are legal; the
    /// most recent insert shadows older ones, so callers find-first.
    pub fn insert(&self, name: &str, logger: Arc<Logger>) -> Arc<Logger> {
        let shard = &self.shards[Self::shard_index(name)];
        let entry = Box::into_raw(Box::new(Entry {
            name: name.to_string(),
            logger: Arc::clone(&logger),
            next: AtomicPtr::new(ptr::null_mut()),
        }));

        let mut head = shard.load(Ordering::Acquire);
        loop {
            // SAFETY: `entry` is unpublished until the CAS succeeds.
            unsafe { (*entry).next.store(head, Ordering::Relaxed) };
            match shard.compare_exchange_weak(head, entry, Ordering::Release, Ordering::Acquire) {
                Ok(_) => return logger,
                Err(observed) => head = observed,
            }
        }
    }

    /// Unlink and retire the first entry matching `name`
    pub fn remove(&self, name: &str) -> Result<bool> {
        if name.is_empty() {
            return Ok(false);
        }
        let shard = &self.shards[Self::shard_index(name)];

        'restart: loop {
            let mut prev: *mut Entry = ptr::null_mut();
            let mut _prev_guard: Option<HazardGuard> = None;
            let mut current = shard.load(Ordering::Acquire);

            while !current.is_null() {
                let guard = self.domain.protect(current)?;
                let source = if prev.is_null() {
                    shard.load(Ordering::Acquire)
                } else {
                    // SAFETY: `prev` is still protected by `_prev_guard`.
                    unsafe { (*prev).next.load(Ordering::Acquire) }
                };
                if source != current {
                    continue 'restart;
                }

                // SAFETY: protected and validated above.
                let entry = unsafe { &*current };
                let next = entry.next.load(Ordering::Acquire);

                if entry.name == name {
                    let unlinked = if prev.is_null() {
                        shard
                            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                    } else {
                        // SAFETY: `prev` is still protected by `_prev_guard`.
                        unsafe {
                            (*prev)
                                .next
                                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                                .is_ok()
                        }
                    };

                    if unlinked {
                        drop(guard);
                        self.domain.retire(current);
                        return Ok(true);
                    }
                    continue 'restart;
                }

                prev = current;
                _prev_guard = Some(guard);
                current = next;
            }
            return Ok(false);
        }
    }

    /// Drop every entry directly. Teardown-only: callers guarantee no
    /// concurrent access.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut current = shard.swap(ptr::null_mut(), Ordering::AcqRel);
            while !current.is_null() {
                // SAFETY: exclusive access per the teardown contract.
                let entry = unsafe { Box::from_raw(current) };
                current = entry.next.load(Ordering::Acquire);
            }
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Registry({} shards)", self.shards.len())
    }
}
