use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};

use crate::synchro::{OnDrop, Switch};

use super::context::{self, ExecutionContext};
use super::queue::TaskQueue;
use super::task::Task;

/// Observer a worker reports its lifecycle and load events to;
/// implemented by the scheduler that owns the worker. Every call happens
/// synchronously on the reporting worker's thread (or, for enqueues, on
/// the thread that produced the task) and must not block.
pub(crate) trait WorkerEvents: Send + Sync {
    /// A task landed on `source`'s queue.
    fn task_enqueued(&self, source: &Worker);

    /// `sender` found its queue empty. Returns true when a task was
    /// transferred onto `sender`'s queue, so it should look again before
    /// parking.
    fn worker_starving(&self, sender: &Worker) -> bool;

    /// `sender` finished its setup and is about to start fetching.
    fn worker_ready(&self, sender: &Worker);
}

/// Lifecycle of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Worker thread used to execute tasks.
/// A worker sleeps until there is at least one task to execute.
pub struct Worker {
    /// Slot of this worker within the owning scheduler.
    index: usize,

    /// Tasks scheduled on this worker ready for execution. Other tasks
    /// in the system are reachable through task dependencies only.
    queue: TaskQueue,

    /// Whether the worker loop has started.
    running: Switch,

    /// Latched stop request; once on, the loop winds down even if the
    /// request arrived before the loop came up.
    stop_requested: Switch,

    /// Used for the sleep/wake handshake below.
    sleep_lock: Mutex<()>,

    /// Condition variable used to wake up a sleeping worker.
    wake_up: Condvar,

    /// Observer for lifecycle and load events; absent on standalone
    /// workers.
    events: OnceLock<Weak<dyn WorkerEvents>>,

    /// How many tasks this worker pulled from its queue.
    fetched_tasks: AtomicU64,

    /// How many tasks this worker ran directly as continuations,
    /// without them ever touching the queue.
    direct_continuations: AtomicU64,
}

impl Worker {
    /// Create a new worker with a queue of `queue_capacity` slots.
    pub fn new(index: usize, queue_capacity: usize) -> Self {
        Self {
            index,
            queue: TaskQueue::with_capacity(queue_capacity),
            running: Switch::new(),
            stop_requested: Switch::new(),
            sleep_lock: Mutex::new(()),
            wake_up: Condvar::new(),
            events: OnceLock::new(),
            fetched_tasks: AtomicU64::new(0),
            direct_continuations: AtomicU64::new(0),
        }
    }

    /// Slot of this worker within the owning scheduler.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Attach the event observer. May only happen once, before the
    /// worker starts.
    pub(crate) fn bind_events(&self, events: Weak<dyn WorkerEvents>) {
        assert!(
            self.events.set(events).is_ok(),
            "a worker reports to a single observer"
        );
    }

    fn events(&self) -> Option<Arc<dyn WorkerEvents>> {
        self.events.get().and_then(Weak::upgrade)
    }

    /// Check whether the worker loop should keep going.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.probe() && !self.stop_requested.probe()
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        match (self.running.probe(), self.stop_requested.probe()) {
            (false, false) => WorkerState::Idle,
            (true, false) => WorkerState::Running,
            (true, true) => WorkerState::Stopping,
            (false, true) => WorkerState::Stopped,
        }
    }

    /// Request loop termination. Tasks still queued when the loop winds
    /// down are abandoned; the execution in flight completes. Stopping a
    /// stopped worker is a no-op.
    pub fn stop(&self) {
        self.stop_requested.turn_on();

        let guard = self.sleep_lock.lock().unwrap();
        drop(guard);
        self.wake_up.notify_all();
    }

    /// Enqueue a task for execution on this worker and wake it.
    pub fn enqueue_task(&self, task: Arc<Task>) {
        self.queue.push_back(task);

        // taking the sleep lock orders this push against the empty-queue
        // re-check a parking worker performs, so the wakeup cannot be
        // lost.
        let guard = self.sleep_lock.lock().unwrap();
        drop(guard);
        self.wake_up.notify_all();
    }

    /// Steal the oldest queued task. Called by the scheduler on behalf
    /// of starving workers.
    pub fn dequeue_task(&self) -> Option<Arc<Task>> {
        self.queue.pop_front()
    }

    /// How many tasks are currently queued on this worker.
    #[must_use]
    pub fn queued_tasks(&self) -> usize {
        self.queue.len()
    }

    /// How many tasks this worker pulled from its queue so far.
    #[must_use]
    pub fn fetched_task_count(&self) -> u64 {
        self.fetched_tasks.load(Ordering::Relaxed)
    }

    /// How many continuations this worker ran directly, without them
    /// passing through the queue.
    #[must_use]
    pub fn direct_continuation_count(&self) -> u64 {
        self.direct_continuations.load(Ordering::Relaxed)
    }

    /// Run the worker loop synchronously on the current thread until
    /// [`Worker::stop`] is observed.
    pub fn start(self: &Arc<Self>) {
        let execution_context = Rc::new(ExecutionContext::new());

        {
            let worker = Arc::clone(self);
            execution_context.set_task_ready(Box::new(move |task| {
                worker.enqueue_task(task);

                if let Some(events) = worker.events() {
                    events.task_enqueued(&worker);
                }
            }));
        }

        context::enter_context(execution_context.clone());
        let _unbind = OnDrop::new(context::exit_context);

        assert!(self.running.turn_on(), "worker loop is already running");
        let shutdown = Arc::clone(self);
        let _wind_down = OnDrop::new(move || {
            shutdown.running.turn_off();
        });

        if let Some(events) = self.events() {
            events.worker_ready(self);
        }

        tracing::debug!("worker {} entering its run loop", self.index);

        while self.is_running() {
            let Some(task) = self.fetch_task() else {
                break;
            };

            // Depth-first execution: continuations run back to back
            // without this worker touching its queue.
            let mut current = Some(task);
            while let Some(task) = current {
                if !self.is_running() {
                    break;
                }

                current = execution_context.execute_task(task);

                if current.is_some() {
                    self.direct_continuations.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        // Flush remaining tasks.
        self.queue.clear();

        tracing::debug!("worker {} drained its queue and stopped", self.index);
    }

    /// Fetch the next task to execute, parking the thread while nothing
    /// is available. Returns `None` once a stop was requested.
    fn fetch_task(&self) -> Option<Arc<Task>> {
        loop {
            if !self.is_running() {
                return None;
            }

            if let Some(task) = self.queue.pop_back() {
                self.fetched_tasks.fetch_add(1, Ordering::Relaxed);
                return Some(task);
            }

            // Ran dry: ask for a transfer before parking. Called outside
            // the sleep lock, as the transfer lands through
            // `enqueue_task` which takes that lock itself.
            if let Some(events) = self.events() {
                if events.worker_starving(self) {
                    continue;
                }
            }

            let guard = self.sleep_lock.lock().unwrap();

            // Re-check under the sleep lock: anything enqueued between
            // the miss above and here must not put us to sleep.
            if !self.is_running() {
                return None;
            }

            if let Some(task) = self.queue.pop_back() {
                self.fetched_tasks.fetch_add(1, Ordering::Relaxed);
                return Some(task);
            }

            let _woken = self.wake_up.wait(guard).unwrap();
        }
    }
}
