//! Engine facade and the coordinator thread that drives recurring sweeps and
//! adaptive strategy selection.

mod coordinator;
pub mod engine;

pub use engine::TaskEngine;
