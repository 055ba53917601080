use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use super::pool::TaskPool;
use super::task::{Task, TaskList, TaskPayload};

/// Callback invoked whenever a task becomes ready for execution on a
/// context. A context carries exactly one listener, set once by the
/// owning worker; the listener must not block and must tolerate being
/// re-entered from inside an execution step.
pub type TaskReadyFn = Box<dyn Fn(Arc<Task>)>;

thread_local! {
    /// Context bound to the current thread; `None` on foreign threads.
    static INNERMOST_CONTEXT: RefCell<Option<Rc<ExecutionContext>>> = const { RefCell::new(None) };
}

/// Context object used to execute, spawn and continue tasks.
///
/// A context belongs to a single worker thread and never leaves it, so
/// its state is interior-mutable without any locking.
pub struct ExecutionContext {
    /// Pool used to allocate new tasks.
    task_pool: TaskPool,

    /// Task that can still be rescheduled in this context: the task
    /// currently executing, or `None` once a reschedule or yield
    /// consumed it.
    reschedulable_slot: RefCell<Option<Arc<Task>>>,

    /// Pending tasks waiting to be scheduled.
    pending_tasks: RefCell<TaskList>,

    /// Continuations for the task being executed. Always a subset of
    /// `pending_tasks`.
    continuation_tasks: RefCell<TaskList>,

    /// Continuation that extends the currently executing task after a
    /// yield; it receives the task's payload once the run returns.
    yield_target: RefCell<Option<Arc<Task>>>,

    /// Listener called whenever a new task becomes ready for execution.
    task_ready: RefCell<Option<TaskReadyFn>>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            task_pool: TaskPool::new(),
            reschedulable_slot: RefCell::new(None),
            pending_tasks: RefCell::new(TaskList::new()),
            continuation_tasks: RefCell::new(TaskList::new()),
            yield_target: RefCell::new(None),
            task_ready: RefCell::new(None),
        }
    }

    /// Install the ready listener. A context carries a single listener
    /// and it may only be set once.
    pub fn set_task_ready(&self, listener: TaskReadyFn) {
        let mut slot = self.task_ready.borrow_mut();

        assert!(
            slot.is_none(),
            "an execution context carries a single ready listener"
        );

        *slot = Some(listener);
    }

    /// How many tasks this context's pool has constructed so far.
    #[must_use]
    pub fn allocated_tasks(&self) -> u64 {
        self.task_pool.created_so_far()
    }

    /// Execute a task that runs without dependencies nor successors on
    /// this execution context. The task is scheduled immediately after
    /// creation.
    pub fn detach_task<F>(&self, payload: F)
    where
        F: FnMut() + Send + 'static,
    {
        let task = self.task_pool.create_task(&[], Box::new(payload));

        // The task has no dependencies: this call must report it ready.
        let became_ready = task.schedule_conditional();
        assert!(became_ready, "a detached task arms directly into readiness");

        self.announce_ready(task);
    }

    /// Create a new task that runs once every task in `dependencies`
    /// has completed.
    pub fn create_task(&self, dependencies: &[Arc<Task>], payload: TaskPayload) -> Arc<Task> {
        let task = self.task_pool.create_task(dependencies, payload);

        self.pending_tasks.borrow_mut().push(task.clone());

        task
    }

    /// Create a continuation for the current task: as [`Self::create_task`],
    /// and additionally preferred as this worker's next step.
    pub fn create_task_continuation(
        &self,
        dependencies: &[Arc<Task>],
        payload: TaskPayload,
    ) -> Arc<Task> {
        let task = self.task_pool.create_task(dependencies, payload);

        self.continuation_tasks.borrow_mut().push(task.clone());
        self.pending_tasks.borrow_mut().push(task.clone());

        task
    }

    /// Set the current task to be rescheduled as a fresh task after its
    /// current execution, gated on `dependencies`. A task can either be
    /// yielded or rescheduled during one execution, not both.
    pub fn reschedule_task(&self, dependencies: &[Arc<Task>]) {
        let task = self
            .reschedulable_slot
            .borrow_mut()
            .take()
            .expect("only the task currently executing on this context can be rescheduled");

        // The current task has no outstanding dependency at this point.
        task.set_dependencies(dependencies);

        self.pending_tasks.borrow_mut().push(task);
    }

    /// Set the current task to be extended into a continuation of itself
    /// after its current execution, gated on `dependencies`. The
    /// continuation inherits the current task's successors and, once the
    /// run returns, its payload. A task can either be yielded or
    /// rescheduled during one execution, not both.
    pub fn yield_task(&self, dependencies: &[Arc<Task>]) {
        let task = self
            .reschedulable_slot
            .borrow_mut()
            .take()
            .expect("only the task currently executing on this context can be yielded");

        let continuation = self.task_pool.create_deferred(dependencies);

        task.continue_with(&continuation);

        self.continuation_tasks.borrow_mut().push(continuation.clone());
        self.pending_tasks.borrow_mut().push(continuation.clone());

        *self.yield_target.borrow_mut() = Some(continuation);
    }

    /// Execute the provided task.
    ///
    /// Returns the next task to execute on this context, if any became
    /// ready as a continuation of the executed one; that task is handed
    /// over directly and never announced through the ready listener.
    pub fn execute_task(&self, task: Arc<Task>) -> Option<Arc<Task>> {
        debug_assert!(self.pending_tasks.borrow().is_empty());
        debug_assert!(self.continuation_tasks.borrow().is_empty());
        debug_assert!(self.reschedulable_slot.borrow().is_none());
        debug_assert!(self.yield_target.borrow().is_none());

        *self.reschedulable_slot.borrow_mut() = Some(Arc::clone(&task));

        task.execute();

        let pending = std::mem::take(&mut *self.pending_tasks.borrow_mut());
        let continuations = std::mem::take(&mut *self.continuation_tasks.borrow_mut());
        let yield_target = self.yield_target.borrow_mut().take();
        self.reschedulable_slot.borrow_mut().take();

        // A yielded execution extends into its continuation, so the
        // payload moves over before anything can arm the continuation.
        if let Some(target) = &yield_target {
            target.adopt_payload_from(&task);
        }

        let mut next_task: Option<Arc<Task>> = None;

        for pending_task in pending {
            if !pending_task.schedule_conditional() {
                continue;
            }

            let run_locally = next_task.is_none()
                && continuations
                    .iter()
                    .any(|candidate| Arc::ptr_eq(candidate, &pending_task));

            if run_locally {
                next_task = Some(pending_task);
            } else {
                self.announce_ready(pending_task);
            }
        }

        let mut successors = TaskList::new();
        task.move_successors_into(&mut successors);

        for successor in successors {
            if successor.schedule_conditional() {
                self.announce_ready(successor);
            }
        }

        next_task
    }

    fn announce_ready(&self, task: Arc<Task>) {
        if let Some(listener) = self.task_ready.borrow().as_ref() {
            listener(task);
        }
    }
}

// --- thread binding

/// Bind `context` to the current thread. Only one context may be bound
/// per thread; the owning worker clears it when its loop exits.
pub(crate) fn enter_context(context: Rc<ExecutionContext>) {
    INNERMOST_CONTEXT.with(|slot| {
        let mut bound = slot.borrow_mut();

        assert!(
            bound.is_none(),
            "a worker already bound an execution context to this thread"
        );

        *bound = Some(context);
    });
}

pub(crate) fn exit_context() {
    INNERMOST_CONTEXT.with(|slot| slot.borrow_mut().take());
}

/// The context bound to the current thread, if this is a worker thread.
pub(crate) fn current_context() -> Option<Rc<ExecutionContext>> {
    INNERMOST_CONTEXT.with(|slot| slot.borrow().clone())
}

// --- free functions forwarding to the innermost context

/// Create a new task that runs once every task in `dependencies` has
/// completed.
///
/// On a worker thread the task joins the executing context's pending
/// set; on a foreign thread it dispatches through the process-wide
/// scheduler onto a randomly chosen worker.
pub fn create_task<F>(dependencies: &[Arc<Task>], payload: F) -> Arc<Task>
where
    F: FnMut() + Send + 'static,
{
    if let Some(context) = current_context() {
        return context.create_task(dependencies, Box::new(payload));
    }

    match super::scheduler::global() {
        Some(scheduler) => scheduler.create_task(dependencies, payload),
        None => panic!("create_task needs an initialized scheduler for this process"),
    }
}

/// Create a continuation for the current task; the owning worker
/// prefers it as its next step.
///
/// On a foreign thread no task is executing, so the call degenerates to
/// [`create_task`] and dispatches through the process-wide scheduler.
pub fn create_task_continuation<F>(dependencies: &[Arc<Task>], payload: F) -> Arc<Task>
where
    F: FnMut() + Send + 'static,
{
    if let Some(context) = current_context() {
        return context.create_task_continuation(dependencies, Box::new(payload));
    }

    match super::scheduler::global() {
        Some(scheduler) => scheduler.create_task_continuation(dependencies, payload),
        None => panic!("create_task_continuation needs an initialized scheduler for this process"),
    }
}

/// Reschedule the currently executing task as a fresh task gated on
/// `dependencies`. Mutually exclusive with [`yield_task`] within one
/// execution.
///
/// Rescheduling acts on the task currently executing on the calling
/// thread; calling it where nothing is executing is a contract
/// violation, as there is no task a dispatch could act on.
pub fn reschedule_task(dependencies: &[Arc<Task>]) {
    match current_context() {
        Some(context) => context.reschedule_task(dependencies),
        None => panic!(
            "reschedule_task targets the task currently executing on this thread, and nothing is executing here"
        ),
    }
}

/// Extend the currently executing task into a continuation of itself
/// gated on `dependencies`. Mutually exclusive with [`reschedule_task`]
/// within one execution.
///
/// Yielding acts on the task currently executing on the calling thread;
/// calling it where nothing is executing is a contract violation, as
/// there is no task a dispatch could extend.
pub fn yield_task(dependencies: &[Arc<Task>]) {
    match current_context() {
        Some(context) => context.yield_task(dependencies),
        None => panic!(
            "yield_task extends the task currently executing on this thread, and nothing is executing here"
        ),
    }
}
