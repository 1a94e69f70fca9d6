//! The long-running orchestration process: heartbeat loop, signal dispatch,
//! queue and cleanup cycles.

pub mod dispatch;
pub mod heartbeat;
pub mod toolset;

pub use dispatch::classify_outcome;
pub use heartbeat::{Heartbeat, HeartbeatOptions};
pub use toolset::BaselineToolset;
