//! Priority task queue.
//!
//! Lower priority values dequeue first; equal priorities dequeue in
//! arrival order. `get` suspends only the calling worker.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use canopy_state::Task;

struct Entry {
    priority: u64,
    seq: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; invert so the smallest (priority, seq) wins.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-priority queue of tasks with FIFO tie-break.
pub struct TaskQueue {
    heap: Mutex<BinaryHeap<Entry>>,
    /// Arrival counter for the tie-break.
    seq: AtomicU64,
    available: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            available: Notify::new(),
        }
    }

    /// Enqueue a task and wake one waiting worker.
    pub async fn put(&self, task: Task) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().await.push(Entry {
            priority: task.priority,
            seq,
            task,
        });
        self.available.notify_one();
    }

    /// Pop the highest-priority task without waiting.
    pub async fn try_get(&self) -> Option<Task> {
        self.heap.lock().await.pop().map(|e| e.task)
    }

    /// Wait until a task is available.
    pub async fn get(&self) -> Task {
        loop {
            let notified = self.available.notified();
            if let Some(task) = self.try_get().await {
                return task;
            }
            notified.await;
        }
    }

    /// Wait up to `timeout` for a task.
    pub async fn get_timeout(&self, timeout: Duration) -> Option<Task> {
        tokio::time::timeout(timeout, self.get()).await.ok()
    }

    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.heap.lock().await.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
