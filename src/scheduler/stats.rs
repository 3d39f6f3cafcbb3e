use crate::readback::SlotPoolStats;

/// Counters kept by [`crate::scheduler::FramePipeline`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Calls to `render`.
    pub ticks: u64,
    /// Frames begun, summed over views.
    pub frames_begun: u64,
    /// Frames composited successfully, summed over views.
    pub frames_composited: u64,
    /// Frames handed to the sink on this rank.
    pub frames_delivered: u64,
    /// Frames discarded because a contribution or the exchange failed.
    pub frames_dropped: u64,
    /// Ticks whose agreement failed.
    pub frames_abandoned: u64,
    /// Ticks where nothing changed.
    pub frames_skipped: u64,
    /// Ticks that found a full ring.
    pub blocked_ticks: u64,
    /// Completed flushes.
    pub flushes: u64,
    /// Slot pool counters.
    pub slot_pool: SlotPoolStats,
}
