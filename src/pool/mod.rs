//! Bounded worker pool for batch work.
//!
//! Used for per-item enrichment: a fixed number of workers keeps the number of
//! concurrent detail calls small no matter how many items a refresh returns.
//! Results come back in input order ([`WorkerPool::process_batch`]) or stream
//! out as they finish ([`WorkerPool::process_batch_with_callback`]).

mod result;
mod worker;

pub use result::BatchResult;
pub use worker::{DEFAULT_JOB_TIMEOUT, PoolConfig, WorkFn, WorkerPool};
