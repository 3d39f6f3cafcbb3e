use crate::composite::Contribution;
use crate::foundation::core::{FrameSeq, PixelRect, Rank, ViewId};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::readback::device::{FenceStatus, ReadbackDevice, TransferJob};
use crate::readback::slot::{FrameSlot, FrameTicket, SlotPool, SlotState};
use crate::renderer::RenderOutput;
use std::collections::VecDeque;
use std::time::Duration;

/// Upper bound for the configured asynchronicity.
pub const MAX_ASYNC_FRAMES: usize = 2;

/// Answer of [`AsyncReadbackPipeline::begin_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeginFrame {
    /// The frame occupies slot `idx`.
    Slot(usize),
    /// Every slot is outstanding; the oldest frame must be composited first.
    Blocked,
}

/// How long [`AsyncReadbackPipeline::drain`] may wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainMode {
    /// Wait until the transfer finishes.
    Blocking,
    /// Give up after the duration; the frame is then treated as failed.
    Bounded(Duration),
}

/// The oldest frame, moved out of its slot for compositing.
#[derive(Debug)]
pub struct TakenFrame {
    /// Slot index, needed for [`AsyncReadbackPipeline::release`].
    pub slot: usize,
    /// State the frame was begun with.
    pub ticket: FrameTicket,
    /// Filled buffers, or why the frame has none.
    pub contribution: Result<Contribution, String>,
}

/// Per-view ring of `asynchronicity + 1` slots, consumed strictly in begin order.
#[derive(Debug)]
pub struct AsyncReadbackPipeline {
    view: ViewId,
    rank: Rank,
    slots: Vec<FrameSlot>,
    cursor: usize,
    order: VecDeque<usize>,
}

impl AsyncReadbackPipeline {
    /// Ring for `view` allowing `asynchronicity` frames in flight besides the one being rendered.
    pub fn new(view: ViewId, rank: Rank, asynchronicity: usize) -> PipelineResult<Self> {
        if asynchronicity > MAX_ASYNC_FRAMES {
            return Err(PipelineError::validation(format!(
                "asynchronicity must be <= {MAX_ASYNC_FRAMES}, got {asynchronicity}"
            )));
        }
        Ok(Self {
            view,
            rank,
            slots: (0..=asynchronicity).map(|_| FrameSlot::new()).collect(),
            cursor: 0,
            order: VecDeque::new(),
        })
    }

    /// View served by this ring.
    pub fn view(&self) -> ViewId {
        self.view
    }

    /// Ring size (`asynchronicity + 1`).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of non-free slots.
    pub fn outstanding(&self) -> usize {
        self.order.len()
    }

    /// Slot `idx`.
    pub fn slot(&self, idx: usize) -> Option<&FrameSlot> {
        self.slots.get(idx)
    }

    /// States of all slots in ring order.
    pub fn slot_states(&self) -> Vec<SlotState> {
        self.slots.iter().map(|s| s.state).collect()
    }

    /// `true` when the next `begin_frame` would be blocked.
    pub fn would_block(&self) -> bool {
        self.slots[self.cursor].state != SlotState::Free
    }

    /// Slot index of the oldest outstanding frame.
    pub fn front(&self) -> Option<usize> {
        self.order.front().copied()
    }

    /// Sequence numbers of outstanding frames, oldest first.
    pub fn outstanding_seqs(&self) -> Vec<FrameSeq> {
        self.order
            .iter()
            .filter_map(|&i| self.slots[i].ticket.as_ref().map(FrameTicket::seq))
            .collect()
    }

    fn slot_mut(&mut self, idx: usize, expect: SlotState) -> PipelineResult<&mut FrameSlot> {
        let view = self.view;
        let slot = self.slots.get_mut(idx).ok_or_else(|| {
            PipelineError::validation(format!("view {} has no slot {idx}", view.0))
        })?;
        if slot.state != expect {
            return Err(PipelineError::validation(format!(
                "view {} slot {idx} is {:?}, expected {:?}",
                view.0, slot.state, expect
            )));
        }
        Ok(slot)
    }

    /// Claim the next slot in ring order for a new frame.
    ///
    /// Buffers are (re)acquired from `pool` when the slot has none of the ticket's dimensions.
    pub fn begin_frame(
        &mut self,
        ticket: FrameTicket,
        pool: &mut SlotPool,
    ) -> PipelineResult<BeginFrame> {
        if self.would_block() {
            return Ok(BeginFrame::Blocked);
        }
        let idx = self.cursor;
        let (w, h) = (ticket.view.width, ticket.view.height);
        let slot = &mut self.slots[idx];
        if let Some(old) = slot.buffers.take_if(|b| !b.fits(w, h)) {
            pool.release(old);
        }
        if slot.buffers.is_none() {
            slot.buffers = Some(pool.acquire(self.rank, w, h)?);
        }
        tracing::debug!(view = self.view.0, slot = idx, seq = ticket.seq().0, "frame begun");
        slot.state = SlotState::Rendering;
        slot.ticket = Some(ticket);
        slot.failure = None;
        self.order.push_back(idx);
        self.cursor = (self.cursor + 1) % self.slots.len();
        Ok(BeginFrame::Slot(idx))
    }

    /// Hand the render output to `device` and install the completion handle. Never blocks.
    ///
    /// Output that disagrees with the ticket's view marks the frame failed and returns
    /// [`PipelineError::StateMismatch`].
    pub fn submit_transfer(
        &mut self,
        idx: usize,
        output: RenderOutput,
        sparse: bool,
        device: &mut dyn ReadbackDevice,
    ) -> PipelineResult<()> {
        let slot = self.slot_mut(idx, SlotState::Rendering)?;
        let Some(ticket) = slot.ticket.as_ref() else {
            return Err(PipelineError::validation("rendering slot without a ticket"));
        };
        let full = ticket.view.full_rect();
        let mismatch = if output.width != ticket.view.width || output.height != ticket.view.height {
            Some(format!(
                "render output is {}x{}, view {} is {}x{}",
                output.width, output.height, ticket.view.id.0, full.width, full.height
            ))
        } else if !full.contains_rect(output.viewport) {
            Some(format!(
                "viewport {:?} exceeds view {} ({}x{})",
                output.viewport, ticket.view.id.0, full.width, full.height
            ))
        } else {
            output.check_buffers().err().map(|e| e.to_string())
        };
        if let Some(msg) = mismatch {
            slot.state = SlotState::Ready;
            slot.failure = Some(msg.clone());
            return Err(PipelineError::state_mismatch(msg));
        }

        let Some(target) = slot.buffers.take() else {
            return Err(PipelineError::validation("rendering slot without buffers"));
        };
        let region = readback_region(output.viewport, full, sparse);
        slot.fence = Some(device.submit(TransferJob {
            output,
            region,
            target,
        }));
        slot.state = SlotState::TransferPending;
        Ok(())
    }

    /// Record that the frame in slot `idx` produced nothing (render failure).
    pub fn mark_failed(&mut self, idx: usize, reason: impl Into<String>) -> PipelineResult<()> {
        let view = self.view;
        let slot = self.slots.get_mut(idx).ok_or_else(|| {
            PipelineError::validation(format!("view {} has no slot {idx}", view.0))
        })?;
        if !matches!(
            slot.state,
            SlotState::Rendering | SlotState::TransferPending
        ) {
            return Err(PipelineError::validation(format!(
                "cannot fail slot {idx} in state {:?}",
                slot.state
            )));
        }
        slot.fence = None;
        slot.state = SlotState::Ready;
        slot.failure = Some(reason.into());
        Ok(())
    }

    fn settle(slot: &mut FrameSlot, status: FenceStatus) -> bool {
        match status {
            FenceStatus::Pending => false,
            FenceStatus::Complete(c) => {
                slot.buffers = Some(c);
                slot.fence = None;
                slot.state = SlotState::Ready;
                true
            }
            FenceStatus::Failed(reason) => {
                slot.fence = None;
                slot.state = SlotState::Ready;
                slot.failure = Some(reason);
                true
            }
        }
    }

    /// Non-blocking readiness query. A finished transfer moves the slot to `Ready`.
    pub fn poll_ready(&mut self, idx: usize) -> bool {
        let Some(slot) = self.slots.get_mut(idx) else {
            return false;
        };
        match slot.state {
            SlotState::Ready => true,
            SlotState::TransferPending => {
                let status = match slot.fence.as_mut() {
                    Some(f) => f.poll(),
                    None => FenceStatus::Failed("transfer without a fence".to_owned()),
                };
                Self::settle(slot, status)
            }
            _ => false,
        }
    }

    /// Wait for slot `idx`'s transfer.
    ///
    /// A bounded drain that runs out of time fails the frame and returns
    /// [`PipelineError::Transfer`]; the slot is `Ready` afterwards either way.
    pub fn drain(&mut self, idx: usize, mode: DrainMode) -> PipelineResult<()> {
        let view = self.view;
        let Some(slot) = self.slots.get_mut(idx) else {
            return Err(PipelineError::validation(format!(
                "view {} has no slot {idx}",
                view.0
            )));
        };
        if slot.state != SlotState::TransferPending {
            return Ok(());
        }
        let timeout = match mode {
            DrainMode::Blocking => None,
            DrainMode::Bounded(t) => Some(t),
        };
        let status = match slot.fence.as_mut() {
            Some(f) => f.wait(timeout),
            None => FenceStatus::Failed("transfer without a fence".to_owned()),
        };
        if Self::settle(slot, status) {
            return Ok(());
        }
        let msg = format!("view {} slot {idx}: drain timed out after {timeout:?}", view.0);
        slot.fence = None;
        slot.state = SlotState::Ready;
        slot.failure = Some(msg.clone());
        Err(PipelineError::transfer(msg))
    }

    /// Number of leading outstanding frames whose transfers have finished.
    ///
    /// Polls in FIFO order and stops at the first unfinished frame.
    pub fn ready_prefix(&mut self) -> usize {
        let order: Vec<usize> = self.order.iter().copied().collect();
        let mut n = 0;
        for idx in order {
            if !self.poll_ready(idx) {
                break;
            }
            n += 1;
        }
        n
    }

    /// Move the oldest frame out for compositing.
    ///
    /// Returns `Ok(None)` when nothing is outstanding and an error when the oldest frame is not
    /// `Ready`.
    pub fn take_front_for_composite(&mut self) -> PipelineResult<Option<TakenFrame>> {
        let Some(idx) = self.front() else {
            return Ok(None);
        };
        let slot = self.slot_mut(idx, SlotState::Ready)?;
        let Some(ticket) = slot.ticket.clone() else {
            return Err(PipelineError::validation("ready slot without a ticket"));
        };
        let contribution = match (slot.failure.take(), slot.buffers.take()) {
            (None, Some(c)) => Ok(c),
            (Some(reason), buffers) => {
                slot.buffers = buffers;
                Err(reason)
            }
            (None, None) => Err("transfer returned no buffers".to_owned()),
        };
        slot.state = SlotState::Compositing;
        Ok(Some(TakenFrame {
            slot: idx,
            ticket,
            contribution,
        }))
    }

    /// Return the oldest frame's slot to `Free`.
    ///
    /// `buffers` are the ones moved out by [`Self::take_front_for_composite`] (if any). A slot
    /// whose buffers were lost is accounted in `pool` and refilled at the next `begin_frame`.
    pub fn release(
        &mut self,
        idx: usize,
        buffers: Option<Contribution>,
        pool: &mut SlotPool,
    ) -> PipelineResult<()> {
        if self.front() != Some(idx) {
            return Err(PipelineError::validation(format!(
                "view {} slot {idx} released out of order",
                self.view.0
            )));
        }
        let slot = self.slot_mut(idx, SlotState::Compositing)?;
        if let Some(b) = buffers {
            slot.buffers = Some(b);
        }
        if slot.buffers.is_none()
            && let Some(t) = slot.ticket.as_ref()
        {
            pool.forget(t.view.width, t.view.height);
        }
        slot.state = SlotState::Free;
        slot.ticket = None;
        slot.fence = None;
        slot.failure = None;
        self.order.pop_front();
        Ok(())
    }

    /// Drop every frame and return all buffers to `pool`. The ring starts over at slot 0.
    ///
    /// Pending transfers are abandoned; their buffers are accounted as lost.
    pub fn teardown(&mut self, pool: &mut SlotPool) {
        for slot in &mut self.slots {
            let dims = slot.ticket.as_ref().map(|t| (t.view.width, t.view.height));
            match (slot.buffers.take(), dims) {
                (Some(b), _) => pool.release(b),
                (None, Some((w, h))) => pool.forget(w, h),
                (None, None) => {}
            }
            *slot = FrameSlot::new();
        }
        self.order.clear();
        self.cursor = 0;
    }
}

fn readback_region(viewport: PixelRect, full: PixelRect, sparse: bool) -> PixelRect {
    if sparse { viewport } else { full }
}

#[cfg(test)]
#[path = "../../tests/unit/readback/pipeline.rs"]
mod tests;
