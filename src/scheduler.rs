//! Delayed-dispatch scheduler: a thread-safe min-heap of due times plus a
//! dedicated draining thread. One instance is owned per engine (never a
//! process-wide singleton) and serves both scheduled event emission and
//! periodic history pruning.

use log::debug;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct Job<T> {
    due: Instant,
    /// Insertion order; keeps equal due times FIFO.
    seq: u64,
    payload: T,
}

impl<T> PartialEq for Job<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<T> Eq for Job<T> {}

impl<T> PartialOrd for Job<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Job<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest due first.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner<T> {
    queue: Mutex<BinaryHeap<Job<T>>>,
    running: AtomicBool,
    next_seq: AtomicU64,
}

/// Handle to a shared dispatch queue. Cloning yields another handle to the
/// same queue; any handle may schedule, one thread drains.
pub struct DispatchScheduler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DispatchScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for DispatchScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DispatchScheduler<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(BinaryHeap::new()),
                running: AtomicBool::new(true),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue a payload due `delay` from now. Ignored (with a warning)
    /// after `stop`.
    pub fn schedule_in(&self, delay: Duration, payload: T) {
        self.schedule_at(Instant::now() + delay, payload);
    }

    pub fn schedule_at(&self, due: Instant, payload: T) {
        if !self.inner.running.load(Ordering::SeqCst) {
            // Routine during shutdown: the prune task re-arms itself until
            // the queue stops accepting.
            debug!("scheduler is stopped; dropping scheduled entry");
            return;
        }
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.inner.queue.lock().unwrap();
        queue.push(Job { due, seq, payload });
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Signal the draining thread to exit. Entries still queued are dropped
    /// with the queue; there is no flush.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    fn pop_due(&self) -> Option<T> {
        let mut queue = self.inner.queue.lock().unwrap();
        match queue.peek() {
            Some(job) if job.due <= Instant::now() => queue.pop().map(|j| j.payload),
            _ => None,
        }
    }
}

impl<T: Send + 'static> DispatchScheduler<T> {
    /// Spawn the draining thread: repeatedly executes all due payloads, then
    /// sleeps `poll_interval`. Returns the handle for a bounded join at
    /// shutdown.
    pub fn spawn_drain<F>(&self, poll_interval: Duration, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(T) + Send + 'static,
    {
        let scheduler = self.clone();
        thread::Builder::new()
            .name("dispatch".into())
            .spawn(move || {
                while scheduler.inner.running.load(Ordering::SeqCst) {
                    while let Some(payload) = scheduler.pop_due() {
                        handler(payload);
                    }
                    thread::sleep(poll_interval);
                }
                let dropped = scheduler.pending();
                if dropped > 0 {
                    debug!("dispatch thread exiting; dropping {} queued entries", dropped);
                }
            })
            .expect("spawn dispatch thread")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_drained(
        scheduler: &DispatchScheduler<u32>,
        run_for: Duration,
    ) -> (Vec<u32>, JoinHandle<()>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = scheduler.spawn_drain(Duration::from_millis(1), move |v| {
            sink.lock().unwrap().push(v);
        });
        thread::sleep(run_for);
        let drained = seen.lock().unwrap().clone();
        (drained, handle)
    }

    #[test]
    fn test_executes_in_due_order() {
        let scheduler = DispatchScheduler::new();
        scheduler.schedule_in(Duration::from_millis(60), 3);
        scheduler.schedule_in(Duration::from_millis(20), 1);
        scheduler.schedule_in(Duration::from_millis(40), 2);

        let (drained, handle) = collect_drained(&scheduler, Duration::from_millis(150));
        assert_eq!(drained, vec![1, 2, 3]);
        assert_eq!(scheduler.pending(), 0);

        scheduler.stop();
        let _ = handle.join();
    }

    #[test]
    fn test_equal_due_times_stay_fifo() {
        let scheduler = DispatchScheduler::new();
        let due = Instant::now() + Duration::from_millis(10);
        for v in 0..5u32 {
            scheduler.schedule_at(due, v);
        }
        let (drained, handle) = collect_drained(&scheduler, Duration::from_millis(80));
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        scheduler.stop();
        let _ = handle.join();
    }

    #[test]
    fn test_not_executed_before_due() {
        let scheduler = DispatchScheduler::new();
        scheduler.schedule_in(Duration::from_millis(200), 9);
        let (drained, handle) = collect_drained(&scheduler, Duration::from_millis(40));
        assert!(drained.is_empty(), "fired early: {:?}", drained);
        scheduler.stop();
        let _ = handle.join();
    }

    #[test]
    fn test_stop_drops_pending_entries() {
        let scheduler = DispatchScheduler::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        let handle = scheduler.spawn_drain(Duration::from_millis(1), move |v: u32| {
            sink.lock().unwrap().push(v);
        });

        scheduler.schedule_in(Duration::from_secs(60), 1);
        scheduler.stop();
        handle.join().unwrap();

        assert!(fired.lock().unwrap().is_empty());
        // Scheduling after stop is refused
        scheduler.schedule_in(Duration::from_millis(1), 2);
        assert_eq!(scheduler.pending(), 1, "entry queued before stop remains");
    }

    #[test]
    fn test_clone_shares_queue() {
        let a: DispatchScheduler<u32> = DispatchScheduler::new();
        let b = a.clone();
        b.schedule_in(Duration::from_secs(10), 7);
        assert_eq!(a.pending(), 1);
        a.stop();
        assert!(!b.is_running());
    }
}
