// SPDX-License-Identifier: Apache-2.0 OR MIT
// Hazard-pointer domain: safe reclamation for the lock-free structures

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::error::{Error, Result};

/// Hazard slots per domain. `protect` fails with `ResourceExhausted` when
/// every slot is pinned; provision enough for the expected reader count.
const MAX_HAZARD_SLOTS: usize = 100;
/// Retirements between reclamation scans.
const SCAN_THRESHOLD: usize = 1000;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

struct HazardSlot {
    /// Thread that owns this slot; 0 means unowned. Ownership persists
    /// across protections so a thread reuses its slots.
    owner: AtomicU64,
    protected: AtomicPtr<()>,
}

struct RetiredNode {
    ptr: *mut (),
    deleter: Box<dyn FnOnce(*mut ()) + Send>,
}

// SAFETY: a retired pointer is exclusively owned by the domain; the node
// only moves between the retired queue and the reclaiming thread.
unsafe impl Send for RetiredNode {}

/// Safe-reclamation domain shared by the registry and the sink lists.
///
/// Readers publish the pointer they are about to dereference; `retire`d
/// nodes are only freed once no published pointer equals them.
pub struct HazardDomain {
    slots: Box<[HazardSlot]>,
    retired: SegQueue<RetiredNode>,
    retired_count: AtomicUsize,
}

impl HazardDomain {
    pub fn new() -> Arc<Self> {
        let slots: Vec<HazardSlot> = (0..MAX_HAZARD_SLOTS)
            .map(|_| HazardSlot {
                owner: AtomicU64::new(0),
                protected: AtomicPtr::new(ptr::null_mut()),
            })
            .collect();
        Arc::new(Self {
            slots: slots.into_boxed_slice(),
            retired: SegQueue::new(),
            retired_count: AtomicUsize::new(0),
        })
    }

    /// Publish `ptr` and return a guard holding the slot.
    ///
    /// The caller must re-validate the source of `ptr` after protection and
    /// before dereferencing; the guard only guarantees that a validated
    /// pointer is not freed while held.
    pub fn protect<T>(self: &Arc<Self>, ptr: *const T) -> Result<HazardGuard> {
        let tid = current_thread_id();

        // Prefer a slot this thread already owns and is not using.
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.owner.load(Ordering::Acquire) == tid
                && slot.protected.load(Ordering::Relaxed).is_null()
            {
                return Ok(self.publish(index, ptr as *mut ()));
            }
        }

        // Otherwise claim an unowned slot.
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.owner.load(Ordering::Relaxed) == 0
                && slot
                    .owner
                    .compare_exchange(0, tid, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return Ok(self.publish(index, ptr as *mut ()));
            }
        }

        Err(Error::ResourceExhausted("hazard pointer table"))
    }

    fn publish(self: &Arc<Self>, index: usize, ptr: *mut ()) -> HazardGuard {
        // SeqCst: the scan's slot reads must not pass this publication.
        self.slots[index].protected.store(ptr, Ordering::SeqCst);
        HazardGuard {
            domain: Arc::clone(self),
            index,
        }
    }

    /// Queue `ptr` for deferred reclamation. Every `SCAN_THRESHOLD`
    /// retirements trigger a scan.
    pub fn retire<T: Send + 'static>(&self, ptr: *mut T) {
        self.retired.push(RetiredNode {
            ptr: ptr as *mut (),
            deleter: Box::new(|p| {
                // SAFETY: `p` is the Box::into_raw pointer handed to retire;
                // the scan guarantees no protected reader remains.
                unsafe { drop(Box::from_raw(p as *mut T)) }
            }),
        });

        if self.retired_count.fetch_add(1, Ordering::Relaxed) + 1 >= SCAN_THRESHOLD {
            self.scan();
        }
    }

    /// Free retired nodes no hazard slot still points at; the rest are
    /// re-queued for the next scan.
    pub fn scan(&self) {
        self.retired_count.store(0, Ordering::Relaxed);

        let mut protected: Vec<*mut ()> = Vec::with_capacity(MAX_HAZARD_SLOTS);
        for slot in self.slots.iter() {
            let ptr = slot.protected.load(Ordering::SeqCst);
            if !ptr.is_null() {
                protected.push(ptr);
            }
        }
        protected.sort_unstable();

        let mut requeue = Vec::new();
        while let Some(node) = self.retired.pop() {
            if protected.binary_search(&node.ptr).is_ok() {
                requeue.push(node);
            } else {
                let RetiredNode { ptr, deleter } = node;
                deleter(ptr);
            }
        }

        let deferred = requeue.len();
        for node in requeue {
            self.retired.push(node);
        }
        if deferred > 0 {
            self.retired_count.fetch_add(deferred, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    fn retired_len(&self) -> usize {
        self.retired.len()
    }
}

impl Drop for HazardDomain {
    /// Teardown frees everything unconditionally; callers guarantee no
    /// concurrent readers remain.
    fn drop(&mut self) {
        while let Some(RetiredNode { ptr, deleter }) = self.retired.pop() {
            deleter(ptr);
        }
    }
}

/// RAII protection over one published pointer. Dropping the guard clears
/// the slot; the owning thread keeps the slot for reuse.
pub struct HazardGuard {
    domain: Arc<HazardDomain>,
    index: usize,
}

impl Drop for HazardGuard {
    fn drop(&mut self) {
        self.domain.slots[self.index]
            .protected
            .store(ptr::null_mut(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_scan_frees_unprotected() {
        let domain = HazardDomain::new();
        let drops = Arc::new(AtomicUsize::new(0));

        let ptr = Box::into_raw(Box::new(Tracked(Arc::clone(&drops))));
        domain.retire(ptr);
        assert_eq!(drops.load(Ordering::Relaxed), 0);

        domain.scan();
        assert_eq!(drops.load(Ordering::Relaxed), 1);
        assert_eq!(domain.retired_len(), 0);
    }

    #[test]
    fn test_protected_pointer_survives_scan() {
        let domain = HazardDomain::new();
        let drops = Arc::new(AtomicUsize::new(0));

        let ptr = Box::into_raw(Box::new(Tracked(Arc::clone(&drops))));
        let guard = domain.protect(ptr).unwrap();
        domain.retire(ptr);

        domain.scan();
        assert_eq!(drops.load(Ordering::Relaxed), 0);
        assert_eq!(domain.retired_len(), 1);

        drop(guard);
        domain.scan();
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_teardown_frees_everything() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let domain = HazardDomain::new();
            for _ in 0..5 {
                domain.retire(Box::into_raw(Box::new(Tracked(Arc::clone(&drops)))));
            }
        }
        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_slot_exhaustion() {
        let domain = HazardDomain::new();
        let target = Box::into_raw(Box::new(0u32));

        let guards: Vec<_> = (0..MAX_HAZARD_SLOTS)
            .map(|_| domain.protect(target).unwrap())
            .collect();
        assert!(matches!(
            domain.protect(target),
            Err(Error::ResourceExhausted(_))
        ));

        drop(guards);
        assert!(domain.protect(target).is_ok());
        // SAFETY: never retired; reclaim it directly.
        unsafe { drop(Box::from_raw(target)) };
    }

    #[test]
    fn test_slot_reuse_by_same_thread() {
        let domain = HazardDomain::new();
        let target = Box::into_raw(Box::new(0u32));

        for _ in 0..1000 {
            let guard = domain.protect(target).unwrap();
            drop(guard);
        }
        // SAFETY: never retired.
        unsafe { drop(Box::from_raw(target)) };
    }
}
