use std::cell::Cell;
use std::sync::Arc;

use super::task::{Task, TaskList, TaskPayload};

/// Handles allocation and construction of tasks.
///
/// Each execution context owns its own pool, so concurrent allocations
/// always come from distinct pools; the pool itself is not thread-safe.
pub struct TaskPool {
    /// Running total of tasks constructed through this pool.
    created: Cell<u64>,
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskPool {
    pub fn new() -> Self {
        Self {
            created: Cell::new(0),
        }
    }

    /// Construct a task from a callable object.
    /// `dependencies` lists the tasks the new task depends upon.
    pub fn create_task(&self, dependencies: &[Arc<Task>], payload: TaskPayload) -> Arc<Task> {
        self.created.set(self.created.get() + 1);

        Task::with_payload(dependencies, payload)
    }

    /// Construct a task whose payload arrives later, when a yielding
    /// execution extends itself into it.
    pub(crate) fn create_deferred(&self, dependencies: &[Arc<Task>]) -> Arc<Task> {
        self.created.set(self.created.get() + 1);

        Task::deferred(dependencies)
    }

    /// How many tasks this pool has constructed so far.
    #[must_use]
    pub fn created_so_far(&self) -> u64 {
        self.created.get()
    }
}
