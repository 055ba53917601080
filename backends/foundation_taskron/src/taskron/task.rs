use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A list of shared-owned tasks. Predecessors hold strong references to
/// their successors, so a dependency graph stays alive exactly as long
/// as something upstream can still reach it.
pub type TaskList = Vec<Arc<Task>>;

/// Boxed callable a task wraps. It is invoked once per arming of the
/// task; `FnMut` rather than `FnOnce` because a yielded task hands the
/// same payload to its continuation for another run.
pub type TaskPayload = Box<dyn FnMut() + Send + 'static>;

/// Represents the atomic unit of a parallel computation.
/// Tasks are expected to perform a small, non-blocking computation.
pub struct Task {
    /// Number of tasks this task depends upon, plus one while the task
    /// has not been armed for scheduling yet.
    dependency_count: AtomicUsize,

    /// Tasks depending on this task. Only the owning execution mutates
    /// this before the task is armed; afterwards it is drained once.
    successors: Mutex<TaskList>,

    /// The callable. Moved out for the duration of a run so it may
    /// re-enter the spawning surface, then put back for a later arming.
    payload: Mutex<Option<TaskPayload>>,
}

impl Task {
    /// Create a task wrapping `payload` that becomes ready once every
    /// task in `dependencies` has completed.
    pub(crate) fn with_payload(dependencies: &[Arc<Task>], payload: TaskPayload) -> Arc<Task> {
        let task = Arc::new(Task {
            dependency_count: AtomicUsize::new(0),
            successors: Mutex::new(TaskList::new()),
            payload: Mutex::new(Some(payload)),
        });

        task.set_dependencies(dependencies);

        task
    }

    /// Create a task with no payload yet; the payload is moved in later,
    /// when a yielding execution extends itself into this task.
    pub(crate) fn deferred(dependencies: &[Arc<Task>]) -> Arc<Task> {
        let task = Arc::new(Task {
            dependency_count: AtomicUsize::new(0),
            successors: Mutex::new(TaskList::new()),
            payload: Mutex::new(None),
        });

        task.set_dependencies(dependencies);

        task
    }

    /// Set task dependencies, replacing any existing ones, and re-arm the
    /// task. May only be called while this task has no outstanding
    /// dependency.
    pub fn set_dependencies(self: &Arc<Self>, dependencies: &[Arc<Task>]) {
        assert_eq!(
            self.dependency_count.load(Ordering::Acquire),
            0,
            "dependencies may only be rewired on a task with no outstanding dependency"
        );

        // The additional count is released by the arming call to
        // `schedule_conditional`, keeping the task unready until setup
        // is complete.
        self.dependency_count
            .store(dependencies.len() + 1, Ordering::Release);

        for dependency in dependencies {
            assert!(
                !Arc::ptr_eq(dependency, self),
                "a task cannot depend on itself"
            );

            dependency.successors.lock().unwrap().push(Arc::clone(self));
        }
    }

    /// Attempt to schedule this task by decreasing its dependency count
    /// by one. Returns true when the task just became ready; exactly one
    /// of any set of concurrent callers observes true.
    pub fn schedule_conditional(&self) -> bool {
        let previous = self.dependency_count.fetch_sub(1, Ordering::AcqRel);

        assert!(
            previous >= 1,
            "task was scheduled more often than its dependency count allows"
        );

        previous == 1
    }

    /// Run the payload. Must only be called after `schedule_conditional`
    /// reported the task ready.
    pub fn execute(&self) {
        let taken = self.payload.lock().unwrap().take();

        if let Some(mut payload) = taken {
            payload();

            *self.payload.lock().unwrap() = Some(payload);
        }
    }

    /// Move the successors from this task onto `other`. Only valid while
    /// this task's successors have not been fired yet.
    pub fn continue_with(&self, other: &Arc<Task>) {
        if std::ptr::eq(self, Arc::as_ptr(other)) {
            return;
        }

        self.move_successors_into(&mut other.successors.lock().unwrap());
    }

    /// Drain this task's successors into `collected`.
    pub fn move_successors_into(&self, collected: &mut TaskList) {
        let mut successors = self.successors.lock().unwrap();

        if collected.is_empty() {
            std::mem::swap(&mut *successors, collected);
        } else {
            collected.append(&mut successors);
        }
    }

    /// Move the payload out of `source` into this task.
    pub(crate) fn adopt_payload_from(&self, source: &Task) {
        let moved = source.payload.lock().unwrap().take();

        *self.payload.lock().unwrap() = moved;
    }

    #[cfg(test)]
    pub(crate) fn outstanding_dependencies(&self) -> usize {
        self.dependency_count.load(Ordering::Acquire)
    }
}
