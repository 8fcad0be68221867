//! Infrastructure adapters for queue backing structures.

pub mod queue;
pub use queue::{LockedQueue, ShardedQueue};
