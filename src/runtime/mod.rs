//! Concurrency primitives for part transfers

pub mod cancel;
pub mod pool;

pub use cancel::CancelSignal;
pub use pool::{FailurePolicy, PoolConfig, PoolReport, TransferPool};
