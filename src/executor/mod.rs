//! Concurrent job execution: worker pool, per-job runner, shared run state,
//! and process-tree termination.

pub mod context;
pub mod pool;
pub mod process_tree;
pub mod runner;

pub use context::RunContext;
pub use pool::WorkerPool;
pub use process_tree::ProcessGroupKiller;
