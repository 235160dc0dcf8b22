//! Scheduler state: the one handle shared by workers and control loops.
//!
//! Owns the task queue, the worker pool, the task book and the shutdown
//! flag. Task completion is tri-state: `Completed` and `Failed` are
//! terminal and each release a task's outstanding slot exactly once;
//! `Requeued` puts the task back on the queue and leaves it outstanding,
//! so drain detection cannot fire while a retry is pending.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

use canopy_state::{Task, TaskId, TaskResult, WorkerId};

use crate::error::PoolResult;
use crate::queue::TaskQueue;
use crate::workers::{WorkerBounds, WorkerPool};

/// How a worker finished with a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(TaskResult),
    Failed(String),
    Requeued,
}

/// Cumulative task counters plus current queue shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounters {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
    pub queued: usize,
    pub in_flight: usize,
    pub outstanding: usize,
}

#[derive(Default)]
struct TaskBook {
    /// Submitted and not yet terminal.
    pending: HashSet<TaskId>,
    /// Currently owned by a worker.
    in_flight: HashMap<TaskId, WorkerId>,
}

/// Shared scheduler state, constructed once at startup.
pub struct SchedulerState {
    queue: TaskQueue,
    workers: WorkerPool,
    book: Mutex<TaskBook>,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    /// Woken whenever a task reaches a terminal state.
    settled: Notify,
    shutdown: watch::Sender<bool>,
    started_at: Instant,
}

impl SchedulerState {
    pub fn new(bounds: WorkerBounds, initial_workers: u32) -> PoolResult<Self> {
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            queue: TaskQueue::new(),
            workers: WorkerPool::new(bounds, initial_workers)?,
            book: Mutex::new(TaskBook::default()),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            settled: Notify::new(),
            shutdown,
            started_at: Instant::now(),
        })
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    // ── Admission ──────────────────────────────────────────────────

    /// Enqueue a new task. Returns false once shutdown has been signaled
    /// or if a task with the same id is still outstanding.
    pub async fn submit(&self, task: Task) -> bool {
        if self.is_shutting_down() {
            debug!(task_id = %task.id, "submit rejected: shutting down");
            return false;
        }

        let mut book = self.book.lock().await;
        if !book.pending.insert(task.id.clone()) {
            warn!(task_id = %task.id, "submit rejected: task already outstanding");
            return false;
        }
        drop(book);

        self.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = %task.id, priority = task.priority, "task submitted");
        self.queue.put(task).await;
        true
    }

    /// Take the next task for `worker_id`, waiting up to `timeout`.
    pub async fn next_task(&self, worker_id: &str, timeout: Duration) -> Option<Task> {
        let task = self.queue.get_timeout(timeout).await?;
        self.book
            .lock()
            .await
            .in_flight
            .insert(task.id.clone(), worker_id.to_string());
        Some(task)
    }

    // ── Completion ─────────────────────────────────────────────────

    /// Record a task's outcome. `Requeued` puts `task` back on the queue
    /// with `retry_count + 1`.
    pub async fn finish(&self, mut task: Task, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed(_) => self.mark_completed(&task.id).await,
            TaskOutcome::Failed(reason) => self.mark_failed(&task.id, &reason).await,
            TaskOutcome::Requeued => {
                self.book.lock().await.in_flight.remove(&task.id);
                task.retry_count += 1;
                self.retries.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = %task.id, attempt = task.retry_count, "task requeued");
                self.queue.put(task).await;
            }
        }
    }

    pub async fn mark_completed(&self, task_id: &str) {
        if self.settle(task_id).await {
            self.completed.fetch_add(1, Ordering::Relaxed);
            debug!(%task_id, "task completed");
            self.settled.notify_waiters();
        }
    }

    pub async fn mark_failed(&self, task_id: &str, reason: &str) {
        if self.settle(task_id).await {
            self.failed.fetch_add(1, Ordering::Relaxed);
            debug!(%task_id, %reason, "task failed");
            self.settled.notify_waiters();
        }
    }

    /// Drop a task from the book. False if it was not outstanding.
    async fn settle(&self, task_id: &str) -> bool {
        let mut book = self.book.lock().await;
        book.in_flight.remove(task_id);
        if book.pending.remove(task_id) {
            true
        } else {
            warn!(%task_id, "ignoring terminal signal for task that is not outstanding");
            false
        }
    }

    // ── Drain detection ────────────────────────────────────────────

    /// Submitted tasks that have not reached a terminal state.
    pub async fn outstanding(&self) -> usize {
        self.book.lock().await.pending.len()
    }

    /// Queue empty and nothing outstanding.
    pub async fn is_drained(&self) -> bool {
        self.outstanding().await == 0 && self.queue.is_empty().await
    }

    /// Wait until every submitted task has settled.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.settled.notified();
            if self.is_drained().await {
                return;
            }
            notified.await;
        }
    }

    // ── Shutdown ───────────────────────────────────────────────────

    /// Set the process-wide shutdown flag.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("shutdown signaled");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    // ── Counters ───────────────────────────────────────────────────

    pub async fn counters(&self) -> TaskCounters {
        let book = self.book.lock().await;
        let in_flight = book.in_flight.len();
        let outstanding = book.pending.len();
        drop(book);

        TaskCounters {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            queued: self.queue.len().await,
            in_flight,
            outstanding,
        }
    }

    /// Workers currently holding a task.
    pub async fn busy_workers(&self) -> u32 {
        let book = self.book.lock().await;
        book.in_flight.values().collect::<HashSet<_>>().len() as u32
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
