//! Queue strategy backends.

pub mod locked;
pub mod sharded;

pub use locked::LockedQueue;
pub use sharded::ShardedQueue;
