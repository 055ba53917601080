use std::sync::{Arc, Mutex};

use super::task::Task;

/// Queue of ready tasks backed by a fixed-capacity circular buffer.
///
/// The owning worker pushes and pops at the back; any other thread may
/// pop at the front. The owner therefore drains in LIFO order while
/// stealers observe FIFO order. One slot stays reserved to tell a full
/// buffer from an empty one, so a queue of capacity N holds N - 1 tasks.
pub struct TaskQueue {
    state: Mutex<QueueState>,
}

struct QueueState {
    /// Slots of the circular buffer. Vacated slots are reset to `None`
    /// so task ownership is released promptly.
    slots: Vec<Option<Arc<Task>>>,

    /// Index of the first element in the range.
    begin: usize,

    /// One past the index of the last element.
    end: usize,
}

impl TaskQueue {
    /// Create a new task queue with room for `capacity - 1` tasks.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity >= 2,
            "a task queue needs at least two slots to hold anything"
        );

        Self {
            state: Mutex::new(QueueState {
                slots: (0..capacity).map(|_| None).collect(),
                begin: 0,
                end: 0,
            }),
        }
    }

    /// Push a new element on the back. Owner thread only.
    /// Pushing onto a full queue is a contract violation.
    pub fn push_back(&self, task: Arc<Task>) {
        let mut state = self.state.lock().unwrap();
        let capacity = state.slots.len();

        let slot = state.end;
        state.slots[slot] = Some(task);
        state.end = (slot + 1) % capacity;

        assert!(state.begin != state.end, "task queue overflow");
    }

    /// Pop an element from the back. Owner thread only.
    /// Returns `None` when the queue is empty.
    pub fn pop_back(&self) -> Option<Arc<Task>> {
        let mut state = self.state.lock().unwrap();

        if state.begin == state.end {
            return None;
        }

        let capacity = state.slots.len();
        let slot = if state.end > 0 {
            state.end - 1
        } else {
            capacity - 1
        };
        state.end = slot;

        state.slots[slot].take()
    }

    /// Pop an element from the front. Any thread.
    /// Returns `None` when the queue is empty.
    pub fn pop_front(&self) -> Option<Arc<Task>> {
        let mut state = self.state.lock().unwrap();

        if state.begin == state.end {
            return None;
        }

        let capacity = state.slots.len();
        let slot = state.begin;
        let task = state.slots[slot].take();
        state.begin = (slot + 1) % capacity;

        task
    }

    /// Remove every task from the queue; used when a worker shuts down.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        let capacity = state.slots.len();

        while state.begin != state.end {
            let slot = state.begin;
            state.slots[slot] = None;
            state.begin = (slot + 1) % capacity;
        }
    }

    /// How many tasks are currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap();
        let capacity = state.slots.len();

        (state.end + capacity - state.begin) % capacity
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
