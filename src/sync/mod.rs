//! Per-frame agreement across ranks.

pub(crate) mod state;
pub(crate) mod synchronizer;

pub use state::GlobalFrameState;
pub use synchronizer::{CrossRankSynchronizer, SyncOutcome};
