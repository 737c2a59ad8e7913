// SPDX-License-Identifier: Apache-2.0 OR MIT
// Priority-ordered dispatch pool: N queues, N workers, one queue per worker

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;

use crate::error::{Error, Result};
use crate::pool::RecordRef;

/// Sleep between pending-count polls in `flush`.
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default worker count: half the hardware parallelism, at least one.
pub fn default_worker_count() -> usize {
    let hw = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    (hw / 2).max(1)
}

struct QueueItem {
    record: RecordRef,
    priority: u8,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    // Max-heap on the level ordinal; intra-priority order is unspecified.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority.cmp(&other.priority)
    }
}

struct QueueState {
    heap: BinaryHeap<QueueItem>,
    pending: usize,
}

struct QueueData {
    state: Mutex<QueueState>,
    cv: Condvar,
    /// Retires this queue's worker during a shrink.
    stop: AtomicBool,
}

impl QueueData {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                pending: 0,
            }),
            cv: Condvar::new(),
            stop: AtomicBool::new(false),
        })
    }
}

/// Worker pool that owns the background half of the pipeline.
///
/// Producers enqueue round-robin across the serviced queues; each worker
/// drains exactly one queue in priority order and hands records to their
/// logger's `process`. There is no ordering guarantee across queues.
pub struct DispatchPool {
    queues: ArcSwap<Vec<Arc<QueueData>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Queues currently serviced by a worker; enqueue selects modulo this.
    active: AtomicUsize,
    running: AtomicBool,
    flushing: AtomicBool,
    /// Records popped but not yet through their sinks.
    in_flight: AtomicUsize,
    next_queue: AtomicUsize,
    resize_lock: Mutex<()>,
}

impl DispatchPool {
    pub fn new(worker_count: usize) -> Arc<Self> {
        let count = worker_count.max(1);
        let queues: Vec<Arc<QueueData>> = (0..count).map(|_| QueueData::new()).collect();

        let pool = Arc::new(Self {
            queues: ArcSwap::from_pointee(queues),
            workers: Mutex::new(Vec::new()),
            active: AtomicUsize::new(count),
            running: AtomicBool::new(true),
            flushing: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            next_queue: AtomicUsize::new(0),
            resize_lock: Mutex::new(()),
        });

        let mut workers = pool.workers.lock().unwrap_or_else(|e| e.into_inner());
        for index in 0..count {
            workers.push(Self::spawn_worker(&pool, index));
        }
        drop(workers);
        pool
    }

    fn spawn_worker(pool: &Arc<Self>, index: usize) -> JoinHandle<()> {
        let pool = Arc::clone(pool);
        thread::Builder::new()
            .name(format!("relaylog-worker-{index}"))
            .spawn(move || pool.worker_loop(index))
            .expect("spawn dispatch worker")
    }

    /// Hand a record to the pool. Returns `false` (and releases the record)
    /// when the pool is not accepting work.
    pub fn enqueue(&self, record: RecordRef, priority: u8) -> bool {
        if !self.running.load(Ordering::Acquire)
            || self.flushing.load(Ordering::Acquire)
            || !record.is_active()
        {
            record.pool().release(&record);
            return false;
        }

        let table = self.queues.load();
        let queues = table.as_slice();
        let active = self.active.load(Ordering::Acquire).clamp(1, queues.len());
        let index = self.next_queue.fetch_add(1, Ordering::Relaxed) % active;
        let queue = &queues[index];

        let mut state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
        state.heap.push(QueueItem { record, priority });
        state.pending += 1;
        queue.cv.notify_one();
        true
    }

    fn worker_loop(self: Arc<Self>, index: usize) {
        let queue = {
            let table = self.queues.load();
            Arc::clone(&table.as_slice()[index])
        };

        'work: loop {
            let mut state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
            while state.heap.is_empty()
                && !queue.stop.load(Ordering::Acquire)
                && (self.running.load(Ordering::Acquire)
                    || self.flushing.load(Ordering::Acquire))
            {
                state = queue.cv.wait(state).unwrap_or_else(|e| e.into_inner());
            }

            // Shutdown abandons the remainder to the drain below; a stopped
            // (shrunk) worker finishes its queue before exiting.
            if !self.running.load(Ordering::Acquire) && !self.flushing.load(Ordering::Acquire) {
                break 'work;
            }

            let item = match state.heap.pop() {
                Some(item) => {
                    state.pending -= 1;
                    // Counted before the lock drops so flush never observes
                    // a record in neither `pending` nor `in_flight`.
                    self.in_flight.fetch_add(1, Ordering::AcqRel);
                    item
                }
                None => {
                    if queue.stop.load(Ordering::Acquire) {
                        break 'work;
                    }
                    continue 'work;
                }
            };
            drop(state);

            let processed = if item.record.is_active() {
                match item.record.logger().cloned() {
                    Some(logger) => {
                        logger.process(&item.record);
                        true
                    }
                    None => false,
                }
            } else {
                false
            };
            if !processed {
                item.record.pool().release(&item.record);
            }
            // Drop the queue's reference before the in-flight count falls,
            // so a completed flush implies the record left the pipeline.
            drop(item);
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }

        // Release whatever remains; these records never reach a sink.
        let mut state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(item) = state.heap.pop() {
            state.pending -= 1;
            item.record.pool().release(&item.record);
        }
    }

    /// Wait until every record enqueued before this call has been handed to
    /// its sinks, or the deadline passes.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let table = self.queues.load_full();

        let mut total = self.in_flight.load(Ordering::Acquire);
        for queue in table.iter() {
            let state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
            total += state.pending;
            queue.cv.notify_one();
        }
        if total == 0 {
            return Ok(());
        }

        loop {
            thread::sleep(FLUSH_POLL_INTERVAL);

            let mut remaining = self.in_flight.load(Ordering::Acquire);
            for queue in table.iter() {
                remaining += queue
                    .state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .pending;
            }
            if remaining == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                eprintln!(
                    "relaylog: flush timed out with {} records outstanding",
                    remaining
                );
                return Err(Error::Timeout(timeout));
            }
        }
    }

    /// Stop the pool. With `flush_first` the queues drain (bounded by
    /// `timeout`) before the workers exit; without it, undelivered records
    /// are released back to their pool unprocessed.
    pub fn shutdown(&self, flush_first: bool, timeout: Duration) -> Result<()> {
        // The flushing flag must be visible before workers can observe
        // `running == false`, or a worker in the gap abandons its queue.
        if flush_first {
            self.flushing.store(true, Ordering::Release);
        }
        if !self.running.swap(false, Ordering::AcqRel) {
            self.flushing.store(false, Ordering::Release);
            return Ok(()); // already shut down
        }

        let mut flush_result = Ok(());
        if flush_first {
            flush_result = self.flush(timeout);
            self.flushing.store(false, Ordering::Release);
        }

        let table = self.queues.load_full();
        for queue in table.iter() {
            let _state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
            queue.cv.notify_all();
        }

        let deadline = Instant::now() + timeout;
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for worker in workers.drain(..) {
            if Instant::now() >= deadline {
                eprintln!("relaylog: worker join timed out during shutdown; detaching");
                drop(worker);
                continue;
            }
            let _ = worker.join();
        }

        flush_result
    }

    /// Change the worker count. Shrunk workers drain their queue before
    /// exiting; queues are retained across shrinks to avoid reallocation.
    pub fn resize(self: &Arc<Self>, new_count: usize) -> Result<()> {
        let new_count = new_count.max(1);
        let _guard = self.resize_lock.lock().unwrap_or_else(|e| e.into_inner());

        if !self.running.load(Ordering::Acquire) {
            return Err(Error::InvalidState(
                "cannot resize a dispatch pool that is not running".to_string(),
            ));
        }

        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        let current = workers.len();
        if new_count == current {
            return Ok(());
        }

        if new_count < current {
            // Route new records away from the retiring queues first.
            self.active.store(new_count, Ordering::Release);
            let table = self.queues.load_full();
            for queue in table.iter().take(current).skip(new_count) {
                queue.stop.store(true, Ordering::Release);
                let _state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
                queue.cv.notify_all();
            }
            for worker in workers.drain(new_count..) {
                let _ = worker.join();
            }
        } else {
            let mut queues: Vec<Arc<QueueData>> = (*self.queues.load_full()).clone();
            while queues.len() < new_count {
                queues.push(QueueData::new());
            }
            for queue in queues.iter().take(new_count) {
                queue.stop.store(false, Ordering::Release);
            }
            self.queues.store(Arc::new(queues));

            for index in current..new_count {
                workers.push(Self::spawn_worker(self, index));
            }
            self.active.store(new_count, Ordering::Release);
        }

        Ok(())
    }

    /// Records enqueued but not yet dequeued, summed across queues
    pub fn pending_count(&self) -> usize {
        let table = self.queues.load_full();
        table
            .iter()
            .map(|queue| {
                queue
                    .state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .pending
            })
            .sum()
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for DispatchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPool")
            .field("workers", &self.worker_count())
            .field("pending", &self.pending_count())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::RecordPool;
    use std::time::Duration;

    #[test]
    fn test_flush_empty_pool() {
        let dispatch = DispatchPool::new(2);
        assert!(dispatch.flush(Duration::from_millis(100)).is_ok());
        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_loggerless_record_is_released() {
        let pool = RecordPool::new();
        let dispatch = DispatchPool::new(1);

        let record = pool.acquire().unwrap();
        assert!(dispatch.enqueue(record, 2));
        dispatch.flush(Duration::from_secs(2)).unwrap();

        assert_eq!(pool.size(), 0);
        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_enqueue_after_shutdown_releases() {
        let pool = RecordPool::new();
        let dispatch = DispatchPool::new(1);
        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();

        let record = pool.acquire().unwrap();
        assert!(!dispatch.enqueue(record, 2));
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let dispatch = DispatchPool::new(2);
        assert!(dispatch.shutdown(true, Duration::from_secs(1)).is_ok());
        assert!(dispatch.shutdown(true, Duration::from_secs(1)).is_ok());
        assert!(!dispatch.is_running());
    }

    #[test]
    fn test_resize_rejected_after_shutdown() {
        let dispatch = DispatchPool::new(1);
        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();
        assert!(dispatch.resize(4).is_err());
    }

    #[test]
    fn test_resize_grow_and_shrink() {
        let pool = RecordPool::new();
        let dispatch = DispatchPool::new(1);

        dispatch.resize(4).unwrap();
        assert_eq!(dispatch.worker_count(), 4);

        for _ in 0..64 {
            let record = pool.acquire().unwrap();
            assert!(dispatch.enqueue(record, 2));
        }
        dispatch.flush(Duration::from_secs(2)).unwrap();

        dispatch.resize(1).unwrap();
        assert_eq!(dispatch.worker_count(), 1);

        // The shrunk pool still services records.
        for _ in 0..16 {
            let record = pool.acquire().unwrap();
            assert!(dispatch.enqueue(record, 2));
        }
        dispatch.flush(Duration::from_secs(2)).unwrap();
        assert_eq!(pool.size(), 0);

        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_pending_count_drains_to_zero() {
        let pool = RecordPool::new();
        let dispatch = DispatchPool::new(2);

        for _ in 0..32 {
            let record = pool.acquire().unwrap();
            dispatch.enqueue(record, 2);
        }
        dispatch.flush(Duration::from_secs(2)).unwrap();
        assert_eq!(dispatch.pending_count(), 0);

        dispatch.shutdown(true, Duration::from_secs(1)).unwrap();
    }
}
