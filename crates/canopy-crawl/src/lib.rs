//! canopy-crawl: the worker side of the scheduler.
//!
//! Workers pull tasks from the shared `SchedulerState`, ask a
//! `PageFetcher` for each node's children, enqueue the child folders, and
//! report terminal outcomes to a `Sink`.
//!
//! # Worker lifecycle
//!
//! ```text
//! admit ──► waiting_for_task ──► received_task ──► fetch
//!   ▲            │  idle timeout (×max) / shutdown        │
//!   │            ▼                                        ├─ ok ──────► task_completed
//!   │         finished ◄── unregister                     ├─ retryable ► retrying_task (backoff, requeue)
//!   │                                                     └─ exhausted ► task_failed_permanently
//!   └── parked while the pool is full
//! ```
//!
//! After each task a worker exits if shutdown was signaled or if the pool
//! now holds more active workers than the ceiling allows. The
//! `Supervisor` keeps enough workers alive to fill the ceiling while work
//! remains.

pub mod fetcher;
pub mod sink;
pub mod supervisor;
pub mod worker;

pub use fetcher::{FsFetcher, PageFetcher};
pub use sink::{MemorySink, Sink, SinkEvent, TreeNode, TreeSink};
pub use supervisor::{Supervisor, SupervisorReport};
pub use worker::{run_worker, WorkerContext, WorkerExit, WorkerReport, WorkerSettings};
