//! The bounded worker pool: an admission gate over `active_workers` plus a bounded FIFO request
//! queue. Both are hand-rolled over `Mutex`/`Condvar` rather than reaching for a channel crate —
//! the blocking/bounded/FIFO semantics the dispatcher needs are exactly what a condvar queue gives
//! for free, and the admission gate already pays for the same pattern (§4.6).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::request::UpgradeRequest;

/// What `pop_timed` returned.
pub enum PopOutcome {
    Item(UpgradeRequest),
    Timeout,
    /// The queue was shut down and is now empty; the caller should exit.
    ShuttingDown,
}

struct QueueState {
    items: VecDeque<UpgradeRequest>,
}

/// A bounded FIFO of pending upgrade requests. Multiple producers may `push`; only the dispatcher
/// is expected to `pop_timed`.
pub struct RequestQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    shutdown: AtomicBool,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        RequestQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1024)),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Blocks the producer while the queue is at capacity, then appends `request`.
    pub fn push(&self, request: UpgradeRequest) {
        let mut state = self.state.lock().unwrap();
        while state.items.len() >= self.capacity {
            state = self.not_full.wait(state).unwrap();
        }
        state.items.push_back(request);
        self.not_empty.notify_one();
    }

    /// Blocks until an item is available or `timeout` elapses or the queue is shut down.
    pub fn pop_timed(&self, timeout: Duration) -> PopOutcome {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return PopOutcome::Item(item);
            }
            if self.shutdown.load(Ordering::Acquire) {
                return PopOutcome::ShuttingDown;
            }
            let (next, result) = self.not_empty.wait_timeout(state, timeout).unwrap();
            state = next;
            if result.timed_out() && state.items.is_empty() {
                if self.shutdown.load(Ordering::Acquire) {
                    return PopOutcome::ShuttingDown;
                }
                return PopOutcome::Timeout;
            }
        }
    }

    /// Signals all blocked producers and consumers that no more items are coming. Already-queued
    /// items are still drained by `pop_timed` before it reports `ShuttingDown`.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// Counted admission gate bounding concurrent workers to `max_threads` (§4.6).
pub struct Pool {
    admission_mutex: Mutex<usize>,
    admission_condvar: Condvar,
    max_threads: usize,
}

impl Pool {
    pub fn new(max_threads: usize) -> Self {
        Pool {
            admission_mutex: Mutex::new(0),
            admission_condvar: Condvar::new(),
            max_threads,
        }
    }

    /// Blocks until a worker slot is free, then takes it.
    pub fn admit(&self) {
        let mut active = self.admission_mutex.lock().unwrap();
        while *active >= self.max_threads {
            active = self.admission_condvar.wait(active).unwrap();
        }
        *active += 1;
    }

    /// Releases a worker slot previously taken by `admit`, waking one waiting admitter.
    pub fn release(&self) {
        let mut active = self.admission_mutex.lock().unwrap();
        *active -= 1;
        self.admission_condvar.notify_one();
    }

    /// The number of workers currently admitted. Exposed for tests and diagnostics only.
    pub fn active_workers(&self) -> usize {
        *self.admission_mutex.lock().unwrap()
    }
}
