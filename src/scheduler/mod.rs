//! Per-tick orchestration of agreement, rendering, readback and compositing.

pub(crate) mod frame;
pub(crate) mod stats;

pub use frame::{FramePipeline, TickOutcome};
pub use stats::PipelineStats;
