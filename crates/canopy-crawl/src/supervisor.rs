//! Keeps the worker population matched to the pool ceiling.
//!
//! Workers are started staggered up to the ceiling. When the ceiling
//! rises, more are started; when it falls, surplus workers retire on
//! their own. Workers that went idle are replaced only while tasks are
//! queued. The supervisor returns once every worker has exited and the
//! scheduler is drained or shutting down. Submit the root task first.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::worker::{run_worker, WorkerContext, WorkerExit, WorkerReport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    pub workers_started: u64,
    pub workers_retired: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub retries: u64,
}

impl SupervisorReport {
    fn absorb(&mut self, report: WorkerReport) {
        self.tasks_completed += report.tasks_completed;
        self.tasks_failed += report.tasks_failed;
        self.retries += report.retries;
        if report.exit == WorkerExit::Retired {
            self.workers_retired += 1;
        }
    }
}

pub struct Supervisor {
    ctx: Arc<WorkerContext>,
    workers: JoinSet<WorkerReport>,
    next_id: u64,
    report: SupervisorReport,
}

impl Supervisor {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self {
            ctx,
            workers: JoinSet::new(),
            next_id: 0,
            report: SupervisorReport::default(),
        }
    }

    /// Start workers until `target` are alive.
    async fn top_up(&mut self, target: u32) {
        let missing = (target as usize).saturating_sub(self.workers.len());
        for i in 0..missing {
            if self.ctx.state.is_shutting_down() {
                break;
            }
            if i > 0 && !self.ctx.settings.startup_delay.is_zero() {
                tokio::time::sleep(self.ctx.settings.startup_delay).await;
            }
            self.next_id += 1;
            let worker_id = format!("worker-{}", self.next_id);
            self.workers.spawn(run_worker(worker_id, self.ctx.clone()));
            self.report.workers_started += 1;
        }
        if missing > 0 {
            debug!(started = missing, alive = self.workers.len(), target, "workers started");
        }
    }

    async fn finished(&self) -> bool {
        self.ctx.state.is_shutting_down() || self.ctx.state.is_drained().await
    }

    pub async fn run(mut self) -> SupervisorReport {
        let state = self.ctx.state.clone();
        let mut ceiling = state.workers().subscribe_ceiling();
        let initial = *ceiling.borrow_and_update();
        info!(workers = initial, "supervisor started");
        self.top_up(initial).await;

        let rebalance = self.ctx.settings.idle_timeout;
        loop {
            if self.workers.is_empty() {
                if self.finished().await {
                    break;
                }
                let target = *ceiling.borrow();
                self.top_up(target).await;
                if self.workers.is_empty() {
                    break;
                }
            }

            tokio::select! {
                Some(joined) = self.workers.join_next() => {
                    match joined {
                        Ok(report) => self.report.absorb(report),
                        Err(e) => warn!(error = %e, "worker task failed"),
                    }
                }
                Ok(()) = ceiling.changed() => {
                    let target = *ceiling.borrow_and_update();
                    self.top_up(target).await;
                }
                _ = tokio::time::sleep(rebalance) => {
                    if !state.is_shutting_down() && !state.queue().is_empty().await {
                        let target = *ceiling.borrow();
                        self.top_up(target).await;
                    }
                }
            }
        }

        info!(
            started = self.report.workers_started,
            completed = self.report.tasks_completed,
            failed = self.report.tasks_failed,
            retries = self.report.retries,
            "supervisor finished"
        );
        self.report
    }
}
