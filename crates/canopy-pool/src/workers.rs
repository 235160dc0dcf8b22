//! Worker pool: bounded admission of worker routines.
//!
//! A worker must hold a slot to pull tasks. Workers denied a slot wait in
//! a FIFO line and are promoted one at a time as slots free up. Resizing
//! changes the ceiling immediately for new admissions; workers already
//! above a lowered ceiling are not evicted and leave through
//! [`WorkerPool::retire_if_over_capacity`] after their current task.

use std::collections::{HashSet, VecDeque};

use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info};

use canopy_state::WorkerId;

use crate::error::{PoolError, PoolResult};

/// Configured range a resize may move the ceiling within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerBounds {
    pub min: u32,
    pub max: u32,
}

impl WorkerBounds {
    pub fn contains(&self, n: u32) -> bool {
        (self.min..=self.max).contains(&n)
    }

    pub fn clamp(&self, n: u32) -> u32 {
        n.clamp(self.min, self.max)
    }
}

/// Point-in-time pool counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolStats {
    pub active: u32,
    pub waiting: u32,
    pub max_workers: u32,
}

struct PoolState {
    max_workers: u32,
    bounds: WorkerBounds,
    active: HashSet<WorkerId>,
    waiting: VecDeque<WorkerId>,
}

impl PoolState {
    /// Move waiting workers into free slots. Returns the promoted ids.
    fn promote(&mut self) -> Vec<WorkerId> {
        let mut promoted = Vec::new();
        while (self.active.len() as u32) < self.max_workers {
            let Some(id) = self.waiting.pop_front() else { break };
            self.active.insert(id.clone());
            promoted.push(id);
        }
        promoted
    }
}

/// Bounded set of admitted workers.
pub struct WorkerPool {
    state: Mutex<PoolState>,
    /// Woken whenever a waiting worker is promoted.
    promoted: Notify,
    ceiling: watch::Sender<u32>,
}

impl WorkerPool {
    /// Create a pool with ceiling `initial`, clamped into `bounds`.
    pub fn new(bounds: WorkerBounds, initial: u32) -> PoolResult<Self> {
        if bounds.min > bounds.max {
            return Err(PoolError::InvalidBounds {
                min: bounds.min,
                max: bounds.max,
            });
        }
        let max_workers = bounds.clamp(initial);
        let (ceiling, _) = watch::channel(max_workers);
        Ok(Self {
            state: Mutex::new(PoolState {
                max_workers,
                bounds,
                active: HashSet::new(),
                waiting: VecDeque::new(),
            }),
            promoted: Notify::new(),
            ceiling,
        })
    }

    /// Admit `worker_id` if a slot is free, otherwise park it in the
    /// waiting line. Returns whether it is active.
    pub async fn register(&self, worker_id: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.active.contains(worker_id) {
            return true;
        }
        if (state.active.len() as u32) < state.max_workers {
            state.active.insert(worker_id.to_string());
            debug!(%worker_id, active = state.active.len(), "worker admitted");
            return true;
        }
        if !state.waiting.iter().any(|w| w == worker_id) {
            state.waiting.push_back(worker_id.to_string());
        }
        debug!(
            %worker_id,
            waiting = state.waiting.len(),
            max = state.max_workers,
            "pool full, worker parked"
        );
        false
    }

    /// Register and, if parked, wait until promoted.
    ///
    /// If the returned future is dropped while parked, the worker stays in
    /// the waiting line; call [`WorkerPool::unregister`] to withdraw it.
    pub async fn admit(&self, worker_id: &str) {
        if self.register(worker_id).await {
            return;
        }
        loop {
            let notified = self.promoted.notified();
            if self.is_active(worker_id).await {
                return;
            }
            notified.await;
        }
    }

    /// Remove `worker_id` from the pool. If that frees a slot, the oldest
    /// waiting worker is promoted and its id returned.
    pub async fn unregister(&self, worker_id: &str) -> Option<WorkerId> {
        let mut state = self.state.lock().await;
        state.active.remove(worker_id);
        state.waiting.retain(|w| w != worker_id);

        let promoted = if (state.active.len() as u32) < state.max_workers {
            state.waiting.pop_front()
        } else {
            None
        };
        if let Some(ref id) = promoted {
            state.active.insert(id.clone());
            debug!(worker_id = %id, "waiting worker promoted");
        }
        drop(state);

        if promoted.is_some() {
            self.promoted.notify_waiters();
        }
        debug!(%worker_id, "worker unregistered");
        promoted
    }

    /// Change the ceiling. Rejected when `new_max` falls outside the
    /// configured bounds; returns the previous ceiling on success.
    pub async fn resize(&self, new_max: u32) -> PoolResult<u32> {
        let mut state = self.state.lock().await;
        if !state.bounds.contains(new_max) {
            return Err(PoolError::CapacityExceeded {
                requested: new_max,
                min: state.bounds.min,
                max: state.bounds.max,
            });
        }

        let previous = state.max_workers;
        state.max_workers = new_max;
        let promoted = state.promote();
        let active = state.active.len();
        drop(state);

        self.ceiling.send_replace(new_max);
        if !promoted.is_empty() {
            self.promoted.notify_waiters();
        }
        info!(from = previous, to = new_max, active, promoted = promoted.len(), "worker pool resized");
        Ok(previous)
    }

    /// Replace the resize bounds. The current ceiling is left alone.
    pub async fn set_bounds(&self, bounds: WorkerBounds) -> PoolResult<()> {
        if bounds.min > bounds.max {
            return Err(PoolError::InvalidBounds {
                min: bounds.min,
                max: bounds.max,
            });
        }
        self.state.lock().await.bounds = bounds;
        Ok(())
    }

    /// Remove `worker_id` if the pool holds more active workers than the
    /// ceiling allows. Returns true if the worker was retired.
    pub async fn retire_if_over_capacity(&self, worker_id: &str) -> bool {
        let mut state = self.state.lock().await;
        if (state.active.len() as u32) > state.max_workers && state.active.remove(worker_id) {
            debug!(%worker_id, active = state.active.len(), max = state.max_workers, "worker retired");
            return true;
        }
        false
    }

    pub async fn is_active(&self, worker_id: &str) -> bool {
        self.state.lock().await.active.contains(worker_id)
    }

    pub async fn active_count(&self) -> u32 {
        self.state.lock().await.active.len() as u32
    }

    pub async fn waiting_count(&self) -> u32 {
        self.state.lock().await.waiting.len() as u32
    }

    pub async fn max_workers(&self) -> u32 {
        self.state.lock().await.max_workers
    }

    pub async fn bounds(&self) -> WorkerBounds {
        self.state.lock().await.bounds
    }

    pub async fn stats(&self) -> WorkerPoolStats {
        let state = self.state.lock().await;
        WorkerPoolStats {
            active: state.active.len() as u32,
            waiting: state.waiting.len() as u32,
            max_workers: state.max_workers,
        }
    }

    /// Subscribe to ceiling changes.
    pub fn subscribe_ceiling(&self) -> watch::Receiver<u32> {
        self.ceiling.subscribe()
    }
}
