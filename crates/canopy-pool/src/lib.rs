//! canopy-pool: hierarchical task queue and bounded worker pool.
//!
//! Holds the scheduler's shared mutable state behind one explicit handle,
//! [`SchedulerState`], constructed once at startup and passed to every
//! worker and control loop:
//!
//! - **Task queue**: priority order (depth-major, sibling-minor), FIFO among
//!   equal priorities, so traversal is approximately breadth-first
//! - **Worker pool**: a ceiling on admitted workers, a FIFO waiting line for
//!   workers denied a slot, and validated resizes that never evict
//! - **Task book**: which tasks are still outstanding, which are in flight,
//!   and the tri-state outcome that keeps retries from counting as done
//!
//! # Architecture
//!
//! ```text
//! SchedulerState
//!   ├── TaskQueue   (BinaryHeap<(priority, seq)> + Notify)
//!   ├── WorkerPool  (active set, waiting VecDeque, ceiling watch)
//!   ├── TaskBook    (pending ids, in-flight task → worker)
//!   └── shutdown    (watch<bool>)
//! ```

pub mod error;
pub mod queue;
pub mod retry;
pub mod state;
pub mod workers;

pub use error::{PoolError, PoolResult};
pub use queue::TaskQueue;
pub use retry::RetryPolicy;
pub use state::{SchedulerState, TaskCounters, TaskOutcome};
pub use workers::{WorkerBounds, WorkerPool, WorkerPoolStats};
