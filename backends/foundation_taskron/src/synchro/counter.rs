// Implements a countdown latch usable to synchronize a group of threads,
// e.g. pool startup barriers or fork/join joins in task payloads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// SyncCounter synchronizes a group of threads through an atomic,
/// notifiable counter: every participant signals the counter once and
/// all waiters are released when it drops to zero.
///
/// ```ignore
/// let counter = SyncCounter::new(10);
///
/// // each of the 10 threads calls counter.signal(true) when it reaches
/// // the synchronization point, blocking until the whole group arrives.
///
/// counter.wait(); // the coordinating thread waits for the group.
/// ```
pub struct SyncCounter {
    /// Current number of outstanding signals.
    count: AtomicUsize,

    /// Protects the sleep/wake handshake below.
    lock: Mutex<()>,

    /// Condition used to wait on the counter reaching zero.
    drained: Condvar,
}

impl SyncCounter {
    /// Create a new counter expecting `count` signals.
    pub fn new(count: usize) -> Self {
        Self {
            count: AtomicUsize::new(count),
            lock: Mutex::new(()),
            drained: Condvar::new(),
        }
    }

    /// Reset the counter to expect `count` signals again.
    /// Only valid while no thread is blocked in [`SyncCounter::wait`].
    pub fn reset(&self, count: usize) {
        self.count.store(count, Ordering::Release);
    }

    /// Reduce the counter by one; the signal that drops it to zero wakes
    /// every waiting thread. When `wait` is true and the counter has not
    /// drained yet, blocks until it does.
    ///
    /// Signalling a drained counter is a contract violation.
    pub fn signal(&self, wait: bool) {
        let previous = self.count.fetch_sub(1, Ordering::AcqRel);

        assert!(previous >= 1, "sync counter was signalled below zero");

        if previous == 1 {
            // notify while holding the lock so a thread between its zero
            // check and its sleep cannot miss the wakeup.
            let guard = self.lock.lock().unwrap();
            drop(guard);
            self.drained.notify_all();
        } else if wait {
            self.wait();
        }
    }

    /// Block until the counter is observed at zero.
    pub fn wait(&self) {
        let mut guard = self.lock.lock().unwrap();

        while self.count.load(Ordering::Acquire) != 0 {
            guard = self.drained.wait(guard).unwrap();
        }
    }
}

/// Guard that signals a [`SyncCounter`] when going out of scope, so a
/// participant cannot forget to report in on an early exit.
pub struct SyncCounterGuard<'a> {
    counter: &'a SyncCounter,

    /// Whether to wait for the counter to drain before leaving the scope.
    wait: bool,
}

impl<'a> SyncCounterGuard<'a> {
    pub fn new(counter: &'a SyncCounter, wait: bool) -> Self {
        Self { counter, wait }
    }
}

impl Drop for SyncCounterGuard<'_> {
    fn drop(&mut self) {
        self.counter.signal(self.wait);
    }
}
