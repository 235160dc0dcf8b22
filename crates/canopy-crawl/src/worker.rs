//! The worker routine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::debug;

use canopy_metrics::PerformanceCollector;
use canopy_pool::{RetryPolicy, SchedulerState, TaskOutcome};
use canopy_state::{CanopyError, Task, TaskResult, WorkerId};

use crate::fetcher::PageFetcher;
use crate::sink::Sink;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    /// How long one wait on the queue lasts.
    pub idle_timeout: Duration,
    /// Consecutive idle waits before a worker exits.
    pub max_idle_timeouts: u32,
    /// Stagger between worker starts.
    pub startup_delay: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5),
            max_idle_timeouts: 3,
            startup_delay: Duration::from_millis(10),
        }
    }
}

/// Everything a worker needs, shared by all workers.
pub struct WorkerContext {
    pub state: Arc<SchedulerState>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub sink: Arc<dyn Sink>,
    pub collector: Arc<PerformanceCollector>,
    pub retry: RetryPolicy,
    pub settings: WorkerSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerExit {
    /// No work arrived for `max_idle_timeouts` consecutive waits.
    #[default]
    Idle,
    Shutdown,
    /// The pool ceiling dropped below the active count.
    Retired,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub retries: u64,
    pub exit: WorkerExit,
}

/// Resolves once shutdown has been signaled.
async fn shutdown_signaled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Run one worker until it goes idle, is retired, or shutdown is signaled.
/// The worker always leaves the pool before returning.
pub async fn run_worker(worker_id: WorkerId, ctx: Arc<WorkerContext>) -> WorkerReport {
    let state = &ctx.state;
    let mut report = WorkerReport::default();
    let mut shutdown = state.subscribe_shutdown();

    debug!(%worker_id, state = "starting", "worker state");
    let admitted = tokio::select! {
        biased;
        _ = state.workers().admit(&worker_id) => true,
        _ = shutdown_signaled(&mut shutdown) => false,
    };

    report.exit = if admitted {
        work_loop(&worker_id, &ctx, &mut report).await
    } else {
        WorkerExit::Shutdown
    };

    state.workers().unregister(&worker_id).await;
    debug!(
        %worker_id,
        state = "finished",
        completed = report.tasks_completed,
        failed = report.tasks_failed,
        exit = ?report.exit,
        "worker state"
    );
    report
}

async fn work_loop(worker_id: &str, ctx: &WorkerContext, report: &mut WorkerReport) -> WorkerExit {
    let state = &ctx.state;
    let mut idle = 0u32;

    loop {
        debug!(%worker_id, state = "waiting_for_task", idle, "worker state");
        let Some(task) = state.next_task(worker_id, ctx.settings.idle_timeout).await else {
            idle += 1;
            if state.is_shutting_down() {
                return WorkerExit::Shutdown;
            }
            if idle >= ctx.settings.max_idle_timeouts {
                return WorkerExit::Idle;
            }
            continue;
        };
        idle = 0;

        debug!(
            %worker_id,
            state = "received_task",
            task_id = %task.id,
            priority = task.priority,
            retry_count = task.retry_count,
            "worker state"
        );
        process(worker_id, ctx, task, report).await;

        if state.is_shutting_down() {
            return WorkerExit::Shutdown;
        }
        if state.workers().retire_if_over_capacity(worker_id).await {
            return WorkerExit::Retired;
        }
    }
}

async fn process(worker_id: &str, ctx: &WorkerContext, task: Task, report: &mut WorkerReport) {
    let state = &ctx.state;
    let started = Instant::now();

    let fetched = ctx.fetcher.discover_children(&task.node).await;
    // Failed fetches count toward latency too.
    let elapsed = started.elapsed();
    ctx.collector.record_task(elapsed).await;

    match fetched {
        Ok(children) => {
            // Children go in before the parent settles so the scheduler
            // never looks drained mid-crawl.
            for (i, child) in children.iter().enumerate() {
                if !child.is_leaf {
                    state.submit(task.child(i + 1, child)).await;
                }
            }

            let result = TaskResult {
                task_id: task.id.clone(),
                node: task.node.clone(),
                children,
                elapsed_ms: elapsed.as_millis() as u64,
            };
            ctx.sink.on_task_completed(&task.id, &result).await;
            debug!(
                %worker_id,
                state = "task_completed",
                task_id = %task.id,
                children = result.children.len(),
                elapsed_ms = result.elapsed_ms,
                "worker state"
            );
            report.tasks_completed += 1;
            state.finish(task, TaskOutcome::Completed(result)).await;
        }
        Err(e) if ctx.retry.should_retry(task.retry_count) => {
            let attempt = task.retry_count + 1;
            let delay = ctx.retry.delay_for(attempt);
            debug!(
                %worker_id,
                state = "retrying_task",
                task_id = %task.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "worker state"
            );
            report.retries += 1;
            tokio::time::sleep(delay).await;
            state.finish(task, TaskOutcome::Requeued).await;
        }
        Err(e) => {
            let error = CanopyError::PermanentTask {
                task_id: task.id.clone(),
                attempts: task.retry_count + 1,
                reason: e.to_string(),
            };
            debug!(
                %worker_id,
                state = "task_failed_permanently",
                task_id = %task.id,
                error = %error,
                "worker state"
            );
            ctx.sink.on_task_failed(&task.id, &error).await;
            report.tasks_failed += 1;
            state.finish(task, TaskOutcome::Failed(error.to_string())).await;
        }
    }
}
