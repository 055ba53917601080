use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::{env, str::FromStr};

use derive_more::derive::From;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::synchro::SyncCounter;
use crate::{AnyResult, BoxedError};

use super::constants::{DEFAULT_QUEUE_CAPACITY, NUM_WORKERS_ENV, QUEUE_CAPACITY_ENV};
use super::context::current_context;
use super::task::Task;
use super::worker::{Worker, WorkerEvents};

/// Bitmask selecting which cores the scheduler may spawn workers on.
/// Bit N covers the core with id N; ids beyond the mask width are never
/// selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoreMask(u64);

impl Default for CoreMask {
    fn default() -> Self {
        Self::all()
    }
}

impl CoreMask {
    /// Mask selecting every core.
    #[must_use]
    pub fn all() -> Self {
        Self(u64::MAX)
    }

    #[must_use]
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Mask selecting only the core with id `core_id`.
    #[must_use]
    pub fn single(core_id: usize) -> Self {
        Self::from_bits(0).with_core(core_id)
    }

    /// Add the core with id `core_id` to the selection.
    #[must_use]
    pub fn with_core(self, core_id: usize) -> Self {
        assert!(
            core_id < u64::BITS as usize,
            "core id {core_id} does not fit the mask"
        );

        Self(self.0 | (1u64 << core_id))
    }

    /// Whether the core with id `core_id` is selected.
    #[must_use]
    pub fn test(&self, core_id: usize) -> bool {
        core_id < u64::BITS as usize && (self.0 >> core_id) & 1 == 1
    }

    #[must_use]
    pub fn bits(&self) -> u64 {
        self.0
    }
}

// -- environment configuration

/// [`get_num_workers`] reads the optional worker cap from the
/// environment variable `TASKRON_NUM_WORKERS`.
pub(crate) fn get_num_workers() -> Option<usize> {
    let cap = env::var(NUM_WORKERS_ENV)
        .ok()
        .and_then(|raw| usize::from_str(&raw).ok())?;

    tracing::debug!("Retrieved worker cap {cap} from {NUM_WORKERS_ENV}");

    assert!(cap != 0, "worker cap from {NUM_WORKERS_ENV} cant be zero");

    Some(cap)
}

/// [`get_queue_capacity`] reads the per-worker queue capacity from the
/// environment variable `TASKRON_QUEUE_CAPACITY`, falling back to
/// [`DEFAULT_QUEUE_CAPACITY`].
pub(crate) fn get_queue_capacity() -> usize {
    match env::var(QUEUE_CAPACITY_ENV)
        .ok()
        .and_then(|raw| usize::from_str(&raw).ok())
    {
        Some(capacity) => {
            tracing::debug!("Retrieved queue capacity {capacity} from {QUEUE_CAPACITY_ENV}");

            assert!(
                capacity >= 2,
                "queue capacity from {QUEUE_CAPACITY_ENV} must be at least 2"
            );

            capacity
        }
        None => DEFAULT_QUEUE_CAPACITY,
    }
}

// -- SchedulerError

pub type SchedulerResult<T> = AnyResult<T, SchedulerError>;

#[derive(From, Debug)]
pub enum SchedulerError {
    /// A worker thread could not be spawned.
    #[from(ignore)]
    FailedStart(BoxedError),
}

impl std::error::Error for SchedulerError {}

impl core::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

// -- Scheduler

/// Load-balancing state guarded by the single scheduler mutex.
struct BalanceState {
    /// Workers that ran out of tasks and found nothing to steal.
    starving: Vec<usize>,

    /// Internal random number generator for balancing choices.
    rng: ChaCha8Rng,
}

struct SchedulerInner {
    /// Workers used to execute tasks concurrently, one per selected
    /// core.
    workers: Vec<Arc<Worker>>,

    /// Threads the workers are spinning on.
    handles: Mutex<Vec<JoinHandle<()>>>,

    balance: Mutex<BalanceState>,

    /// Startup barrier: released once every worker thread is up.
    startup: SyncCounter,
}

impl WorkerEvents for SchedulerInner {
    fn task_enqueued(&self, source: &Worker) {
        // Attempt to hand one task over to a starving worker.
        let mut balance = self.balance.lock().unwrap();

        let Some(&candidate) = balance.starving.last() else {
            return;
        };

        if candidate == source.index() {
            return;
        }

        if let Some(task) = source.dequeue_task() {
            self.workers[candidate].enqueue_task(task);
            balance.starving.pop();

            tracing::debug!(
                "moved a task from worker {} to starving worker {}",
                source.index(),
                candidate
            );
        }
    }

    fn worker_starving(&self, sender: &Worker) -> bool {
        // Attempt to steal a task from any other worker. The scan starts
        // at a random offset so no worker becomes the permanent victim.
        let mut balance = self.balance.lock().unwrap();
        let worker_count = self.workers.len();

        if worker_count > 1 {
            let offset = balance.rng.random_range(0..worker_count);

            for step in 0..worker_count {
                let victim = &self.workers[(offset + step) % worker_count];

                if victim.index() == sender.index() {
                    continue;
                }

                if let Some(task) = victim.dequeue_task() {
                    tracing::debug!(
                        "worker {} stole a task from worker {}",
                        sender.index(),
                        victim.index()
                    );

                    sender.enqueue_task(task);

                    return true;
                }
            }
        }

        if !balance.starving.contains(&sender.index()) {
            balance.starving.push(sender.index());
        }

        false
    }

    fn worker_ready(&self, _sender: &Worker) {
        // Hold the worker here until the whole pool is up, so no early
        // worker observes peers that cannot be stolen from yet.
        self.startup.signal(true);
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let span = tracing::trace_span!("Scheduler::shutdown");
        let _enter = span.enter();

        for worker in &self.workers {
            worker.stop();
        }

        for handle in self.handles.lock().unwrap().drain(..) {
            if handle.join().is_err() {
                tracing::debug!("a worker thread wound down with a panic");
            }
        }
    }
}

/// Scheduler used to schedule and execute tasks across a pool of pinned
/// worker threads.
///
/// The value is owned by the application root; clones share the same
/// pool. Dropping the last clone stops every worker and joins their
/// threads.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Initialize a scheduler with one worker per selected core.
    ///
    /// `cores` restricts which cores receive a worker; unset, every core
    /// available to the process is used. Cores outside the process
    /// affinity are ignored; a selection matching no available core is a
    /// contract violation. `TASKRON_NUM_WORKERS` caps the worker count.
    ///
    /// Blocks until every worker thread is up and running.
    pub fn initialize(cores: Option<CoreMask>) -> SchedulerResult<Scheduler> {
        Self::initialize_with_seed(rand::rng().next_u64(), cores)
    }

    /// As [`Scheduler::initialize`], seeding the balancing randomness
    /// from `seed`.
    pub fn initialize_with_seed(seed: u64, cores: Option<CoreMask>) -> SchedulerResult<Scheduler> {
        let span = tracing::trace_span!("Scheduler::initialize");
        let _enter = span.enter();

        let requested = cores.unwrap_or_default();

        let mut selected: Vec<core_affinity::CoreId> = core_affinity::get_core_ids()
            .unwrap_or_default()
            .into_iter()
            .filter(|core| requested.test(core.id))
            .collect();

        assert!(
            !selected.is_empty(),
            "affinity mask {requested:?} selects no core available to this process"
        );

        if let Some(cap) = get_num_workers() {
            selected.truncate(cap);
        }

        let worker_count = selected.len();
        let queue_capacity = get_queue_capacity();

        tracing::debug!(
            "spawning {} workers with queue capacity {}",
            worker_count,
            queue_capacity
        );

        let inner = Arc::new_cyclic(|scheduler: &Weak<SchedulerInner>| {
            let workers = (0..worker_count)
                .map(|index| {
                    let worker = Arc::new(Worker::new(index, queue_capacity));

                    let events: Weak<dyn WorkerEvents> = scheduler.clone();
                    worker.bind_events(events);

                    worker
                })
                .collect();

            SchedulerInner {
                workers,
                handles: Mutex::new(Vec::new()),
                balance: Mutex::new(BalanceState {
                    starving: Vec::new(),
                    rng: ChaCha8Rng::seed_from_u64(seed),
                }),
                startup: SyncCounter::new(worker_count),
            }
        });

        for (index, core) in selected.into_iter().enumerate() {
            let worker = Arc::clone(&inner.workers[index]);

            let builder = thread::Builder::new().name(format!("taskron_worker_{index}"));
            let spawned = builder.spawn(move || {
                // Pinning may silently fail when the platform refuses
                // the requested affinity; the worker runs unpinned then.
                if !core_affinity::set_for_current(core) {
                    tracing::warn!("worker {} could not be pinned to core {}", index, core.id);
                }

                worker.start();
            });

            match spawned {
                Ok(handle) => inner.handles.lock().unwrap().push(handle),
                Err(err) => {
                    // Drain the startup barrier on behalf of the workers
                    // that will never come up, releasing the ones that
                    // already did, then wind everything down.
                    for _ in index..worker_count {
                        inner.startup.signal(false);
                    }

                    return Err(SchedulerError::FailedStart(Box::new(err)));
                }
            }
        }

        inner.startup.wait();

        Ok(Scheduler { inner })
    }

    /// How many workers this scheduler runs.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.inner.workers.len()
    }

    /// The scheduler's workers; exposed for load inspection.
    #[must_use]
    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.inner.workers
    }

    /// Create and schedule a task that runs without dependencies nor
    /// successors.
    ///
    /// On a worker thread the task stays on the calling worker's context
    /// to keep its cache warm; on a foreign thread it is dispatched onto
    /// a randomly chosen worker to spread inbound work across the pool.
    pub fn detach_task<F>(&self, payload: F)
    where
        F: FnMut() + Send + 'static,
    {
        if let Some(execution_context) = current_context() {
            execution_context.detach_task(payload);
            return;
        }

        let task = Task::with_payload(&[], Box::new(payload));

        let became_ready = task.schedule_conditional();
        assert!(became_ready, "a detached task arms directly into readiness");

        self.enqueue_on_any_worker(task);
    }

    /// Create a task that runs once every task in `dependencies` has
    /// completed.
    ///
    /// On a worker thread the task joins the executing context's pending
    /// set and is armed when the current execution step ends. On a
    /// foreign thread it is armed immediately and, when already ready,
    /// dispatched onto a randomly chosen worker; a dependency-gated task
    /// is scheduled later by whichever worker completes its last
    /// dependency.
    pub fn create_task<F>(&self, dependencies: &[Arc<Task>], payload: F) -> Arc<Task>
    where
        F: FnMut() + Send + 'static,
    {
        if let Some(execution_context) = current_context() {
            return execution_context.create_task(dependencies, Box::new(payload));
        }

        let task = Task::with_payload(dependencies, Box::new(payload));

        if task.schedule_conditional() {
            self.enqueue_on_any_worker(task.clone());
        }

        task
    }

    /// Create a continuation for the current task; the calling worker
    /// prefers it as its next step.
    ///
    /// On a foreign thread no task is executing, so there are no
    /// successors to inherit and no worker to prefer: the call
    /// degenerates to [`Scheduler::create_task`].
    pub fn create_task_continuation<F>(&self, dependencies: &[Arc<Task>], payload: F) -> Arc<Task>
    where
        F: FnMut() + Send + 'static,
    {
        if let Some(execution_context) = current_context() {
            return execution_context.create_task_continuation(dependencies, Box::new(payload));
        }

        self.create_task(dependencies, payload)
    }

    /// Hand a ready task to a randomly chosen worker and nudge the
    /// balancer the same way a locally produced task would.
    fn enqueue_on_any_worker(&self, task: Arc<Task>) {
        let chosen = {
            let mut balance = self.inner.balance.lock().unwrap();
            balance.rng.random_range(0..self.inner.workers.len())
        };

        let worker = &self.inner.workers[chosen];
        worker.enqueue_task(task);

        self.inner.task_enqueued(worker);
    }
}

// -- global accessor

static GLOBAL_SCHEDULER: OnceLock<Scheduler> = OnceLock::new();

/// Initialize the process-wide scheduler. Later calls return the
/// already-installed instance; its workers live for the rest of the
/// process.
pub fn initialize_global(cores: Option<CoreMask>) -> SchedulerResult<&'static Scheduler> {
    if let Some(existing) = GLOBAL_SCHEDULER.get() {
        return Ok(existing);
    }

    let scheduler = Scheduler::initialize(cores)?;

    Ok(GLOBAL_SCHEDULER.get_or_init(move || scheduler))
}

/// The process-wide scheduler, if one was installed.
#[must_use]
pub fn global() -> Option<&'static Scheduler> {
    GLOBAL_SCHEDULER.get()
}

/// Create and schedule a task that runs without dependencies nor
/// successors.
///
/// On a worker thread the task stays on the calling worker's context;
/// on a foreign thread it dispatches through the process-wide scheduler,
/// which must have been installed via [`initialize_global`].
pub fn detach_task<F>(payload: F)
where
    F: FnMut() + Send + 'static,
{
    if let Some(execution_context) = current_context() {
        execution_context.detach_task(payload);
        return;
    }

    match global() {
        Some(scheduler) => scheduler.detach_task(payload),
        None => panic!("detach_task needs an initialized scheduler for this process"),
    }
}
