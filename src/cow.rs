// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copy-on-write snapshot list for read-mostly sink sets

use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::hazard::{HazardDomain, HazardGuard};

struct Node<T> {
    items: Vec<T>,
}

/// Copy-on-write list: writers publish a fresh snapshot with a CAS on the
/// head; readers take a hazard-protected handle over the current snapshot.
///
/// A reader observes either the pre- or the post-write list, never a
/// partial one. Writers serialize only through the head CAS.
pub struct CowList<T> {
    head: AtomicPtr<Node<T>>,
    domain: Arc<HazardDomain>,
    // Ties Send/Sync to the element type; nodes are owned by the list.
    _marker: PhantomData<Box<Node<T>>>,
}

impl<T: Clone + Send + Sync + 'static> CowList<T> {
    /// List with its own private hazard domain
    pub fn new() -> Self {
        Self::with_domain(HazardDomain::new())
    }

    /// List sharing an existing hazard domain
    pub fn with_domain(domain: Arc<HazardDomain>) -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            domain,
            _marker: PhantomData,
        }
    }

    /// Hazard-protected snapshot of the current elements
    pub fn read_handle(&self) -> Result<ReadHandle<T>> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return Ok(ReadHandle {
                    node: ptr::null(),
                    _guard: None,
                });
            }
            let guard = self.domain.protect(head)?;
            // Valid only if the head did not move while the hazard was
            // being published.
            if self.head.load(Ordering::Acquire) == head {
                return Ok(ReadHandle {
                    node: head as *const Node<T>,
                    _guard: Some(guard),
                });
            }
        }
    }

    pub fn add(&self, item: T) -> Result<()> {
        self.publish(|items| items.push(item.clone()))
    }

    pub fn add_range(&self, new_items: &[T]) -> Result<()> {
        if new_items.is_empty() {
            return Ok(());
        }
        self.publish(|items| items.extend_from_slice(new_items))
    }

    /// Remove every element matching `pred`; returns whether any matched
    pub fn remove(&self, pred: impl Fn(&T) -> bool) -> Result<bool> {
        let removed = Cell::new(false);
        self.publish(|items| {
            let before = items.len();
            items.retain(|item| !pred(item));
            removed.set(items.len() != before);
        })?;
        Ok(removed.get())
    }

    /// Swap the head to empty and retire the old snapshot
    pub fn clear(&self) {
        let old = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        if !old.is_null() {
            self.domain.retire(old);
        }
    }

    /// Element count of the current snapshot
    pub fn estimated_len(&self) -> usize {
        self.read_handle().map(|handle| handle.len()).unwrap_or(0)
    }

    /// Rebuild-and-CAS loop shared by the mutators. The old snapshot is
    /// cloned under hazard protection so a racing writer's retire cannot
    /// free the copy source mid-read.
    fn publish(&self, mutate: impl Fn(&mut Vec<T>)) -> Result<()> {
        loop {
            let old = self.head.load(Ordering::Acquire);
            let mut items: Vec<T>;
            if old.is_null() {
                items = Vec::new();
            } else {
                let _guard = self.domain.protect(old)?;
                if self.head.load(Ordering::Acquire) != old {
                    continue;
                }
                // SAFETY: hazard-protected and re-validated above.
                items = unsafe { (*old).items.clone() };
            }

            mutate(&mut items);
            let new = Box::into_raw(Box::new(Node { items }));

            match self
                .head
                .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    if !old.is_null() {
                        self.domain.retire(old);
                    }
                    return Ok(());
                }
                Err(_) => {
                    // SAFETY: `new` was never published.
                    unsafe { drop(Box::from_raw(new)) };
                }
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for CowList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for CowList<T> {
    fn drop(&mut self) {
        let old = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        if !old.is_null() {
            // SAFETY: exclusive access through &mut self; no reader can
            // hold a handle into a list being dropped.
            unsafe { drop(Box::from_raw(old)) };
        }
    }
}

impl<T> std::fmt::Debug for CowList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CowList(head={:p})", self.head.load(Ordering::Relaxed))
    }
}

/// Borrowed view of one snapshot. The hazard guard keeps the snapshot node
/// alive for the handle's lifetime.
pub struct ReadHandle<T> {
    node: *const Node<T>,
    _guard: Option<HazardGuard>,
}

impl<T> ReadHandle<T> {
    pub fn items(&self) -> &[T] {
        if self.node.is_null() {
            &[]
        } else {
            // SAFETY: the hazard guard defers reclamation of the node.
            unsafe { &(*self.node).items }
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items().iter()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn test_add_and_read() {
        let list = CowList::new();
        list.add(1u32).unwrap();
        list.add(2).unwrap();
        list.add(3).unwrap();

        let handle = list.read_handle().unwrap();
        assert_eq!(handle.items(), &[1, 2, 3]);
        assert_eq!(handle.len(), 3);
    }

    #[test]
    fn test_empty_list() {
        let list: CowList<u32> = CowList::new();
        let handle = list.read_handle().unwrap();
        assert!(handle.is_empty());
        assert_eq!(list.estimated_len(), 0);
    }

    #[test]
    fn test_add_range_and_remove() {
        let list = CowList::new();
        list.add_range(&[10u32, 20, 30, 40]).unwrap();

        assert!(list.remove(|v| *v % 20 == 0).unwrap());
        let handle = list.read_handle().unwrap();
        assert_eq!(handle.items(), &[10, 30]);

        assert!(!list.remove(|v| *v == 99).unwrap());
    }

    #[test]
    fn test_clear() {
        let list = CowList::new();
        list.add("sink".to_string()).unwrap();
        list.clear();
        assert_eq!(list.estimated_len(), 0);
    }

    #[test]
    fn test_snapshot_isolation() {
        let list = CowList::new();
        list.add(1u32).unwrap();

        let before = list.read_handle().unwrap();
        list.add(2).unwrap();
        let after = list.read_handle().unwrap();

        // The old handle still sees the snapshot it was taken over.
        assert_eq!(before.items(), &[1]);
        assert_eq!(after.items(), &[1, 2]);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let list = Arc::new(CowList::new());
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = vec![];

        for reader in 0..4 {
            let list = Arc::clone(&list);
            let stop = Arc::clone(&stop);
            handles.push(thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let handle = list.read_handle().unwrap();
                    // Snapshots are complete: values are strictly increasing.
                    let items = handle.items();
                    for pair in items.windows(2) {
                        assert!(pair[0] < pair[1], "reader {reader} saw a torn snapshot");
                    }
                }
            }));
        }

        for value in 0..200u32 {
            list.add(value).unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(list.estimated_len(), 200);
    }
}
