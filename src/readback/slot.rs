use crate::composite::Contribution;
use crate::foundation::core::{FrameSeq, PixelRect, Rank};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::readback::device::CompletionHandle;
use crate::sync::GlobalFrameState;
use crate::view::View;

/// Lifecycle of a [`FrameSlot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Not in use.
    Free,
    /// Begun; the renderer has not submitted yet.
    Rendering,
    /// Transfer in flight.
    TransferPending,
    /// Transfer finished (or failed); waiting for the compositor.
    Ready,
    /// Taken by the compositor.
    Compositing,
}

impl SlotState {
    /// `true` for every state except [`SlotState::Free`].
    pub fn is_outstanding(self) -> bool {
        !matches!(self, SlotState::Free)
    }
}

/// Agreed state a frame was begun with.
///
/// Captured at `begin_frame` so in-flight frames never see later state.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameTicket {
    /// Frame state at begin.
    pub frame: GlobalFrameState,
    /// View state at begin.
    pub view: View,
}

impl FrameTicket {
    /// Sequence number of the frame.
    pub fn seq(&self) -> FrameSeq {
        self.frame.seq
    }
}

/// One ring entry: persistent buffers, a completion handle and a state.
pub struct FrameSlot {
    pub(crate) state: SlotState,
    pub(crate) buffers: Option<Contribution>,
    pub(crate) fence: Option<Box<dyn CompletionHandle>>,
    pub(crate) ticket: Option<FrameTicket>,
    pub(crate) failure: Option<String>,
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("state", &self.state)
            .field("has_buffers", &self.buffers.is_some())
            .field("has_fence", &self.fence.is_some())
            .field("seq", &self.ticket.as_ref().map(FrameTicket::seq))
            .field("failure", &self.failure)
            .finish()
    }
}

impl FrameSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: SlotState::Free,
            buffers: None,
            fence: None,
            ticket: None,
            failure: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Ticket of the frame occupying the slot.
    pub fn ticket(&self) -> Option<&FrameTicket> {
        self.ticket.as_ref()
    }

    /// Failure recorded for the occupying frame.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}

/// Pool configuration.
#[derive(Debug, Clone, Copy)]
pub struct SlotPoolOpts {
    /// Maximum bytes of buffers handed out at the same time.
    pub max_live_bytes: usize,
    /// Maximum bytes kept for reuse.
    pub max_retained_bytes: usize,
}

impl Default for SlotPoolOpts {
    fn default() -> Self {
        Self {
            max_live_bytes: 512 * 1024 * 1024,
            max_retained_bytes: 128 * 1024 * 1024,
        }
    }
}

/// Counters for [`SlotPool`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SlotPoolStats {
    /// Bytes currently handed out.
    pub live_bytes: usize,
    /// Bytes retained for reuse.
    pub retained_bytes: usize,
    /// Fresh allocations.
    pub allocations: u64,
    /// Acquisitions served from retained buffers.
    pub reuses: u64,
    /// Released buffers not retained.
    pub dropped_on_release: u64,
}

/// Budgeted allocator for slot buffers.
///
/// Retained buffers are matched by exact dimensions. Exceeding the live budget is the one
/// persistent failure of the pipeline.
#[derive(Debug)]
pub struct SlotPool {
    opts: SlotPoolOpts,
    stats: SlotPoolStats,
    retained: Vec<Contribution>,
}

impl SlotPool {
    /// Empty pool.
    pub fn new(opts: SlotPoolOpts) -> Self {
        Self {
            opts,
            stats: SlotPoolStats::default(),
            retained: Vec::new(),
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> SlotPoolStats {
        self.stats.clone()
    }

    /// Hand out `width x height` buffers owned by `rank`.
    pub fn acquire(&mut self, rank: Rank, width: u32, height: u32) -> PipelineResult<Contribution> {
        let bytes = Contribution::byte_len(width, height);
        if self.stats.live_bytes.saturating_add(bytes) > self.opts.max_live_bytes {
            return Err(PipelineError::resource_exhausted(format!(
                "slot pool budget of {} bytes exceeded ({} live, {} requested for {}x{})",
                self.opts.max_live_bytes, self.stats.live_bytes, bytes, width, height
            )));
        }

        let buffers = match self.retained.iter().position(|c| c.fits(width, height)) {
            Some(i) => {
                let mut c = self.retained.swap_remove(i);
                self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(bytes);
                self.stats.reuses = self.stats.reuses.saturating_add(1);
                c.rank = rank;
                c.valid = PixelRect::empty();
                c
            }
            None => {
                self.stats.allocations = self.stats.allocations.saturating_add(1);
                Contribution::new(rank, width, height)?
            }
        };
        self.stats.live_bytes = self.stats.live_bytes.saturating_add(bytes);
        Ok(buffers)
    }

    /// Return buffers obtained from [`SlotPool::acquire`].
    pub fn release(&mut self, buffers: Contribution) {
        let bytes = Contribution::byte_len(buffers.width, buffers.height);
        self.stats.live_bytes = self.stats.live_bytes.saturating_sub(bytes);
        if self.stats.retained_bytes.saturating_add(bytes) > self.opts.max_retained_bytes {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_add(bytes);
        self.retained.push(buffers);
    }

    /// Account for buffers that will never come back (lost with a failed transfer).
    pub fn forget(&mut self, width: u32, height: u32) {
        let bytes = Contribution::byte_len(width, height);
        self.stats.live_bytes = self.stats.live_bytes.saturating_sub(bytes);
    }
}
