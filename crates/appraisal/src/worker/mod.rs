pub mod pool;

pub use pool::{PoolResult, WorkerPool};
