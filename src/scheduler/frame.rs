use crate::comm::{Channel, Collective, Communicator, Tag};
use crate::composite::{CompositeContext, CompositeOutcome, SortLastCompositor, valid_rect};
use crate::config::PipelineConfig;
use crate::foundation::core::{BoundingSphere, FrameSeq, Rank, ViewId};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::readback::{
    AsyncReadbackPipeline, BeginFrame, DrainMode, FrameTicket, ReadbackDevice, SlotPool,
    SlotState,
};
use crate::renderer::LocalRenderer;
use crate::scheduler::stats::PipelineStats;
use crate::sink::{CompositeSink, CompositedImage};
use crate::sync::{CrossRankSynchronizer, GlobalFrameState};
use crate::view::{View, ViewParams, ViewRegistry, ViewSetChange};

/// What one call to [`FramePipeline::render`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new frame was begun for every view.
    Rendered {
        /// Sequence number of the new frame.
        seq: FrameSeq,
        /// Older frames composited during the tick.
        composited: usize,
    },
    /// Agreement succeeded but nothing changed.
    Skipped {
        /// Older frames composited during the tick.
        composited: usize,
    },
    /// A ring was full; no new frame was begun.
    Blocked {
        /// Older frames composited during the tick.
        composited: usize,
    },
    /// Agreement failed on this rank; the frame was abandoned.
    Abandoned,
}

struct ViewLane {
    pipeline: AsyncReadbackPipeline,
    context: CompositeContext,
    last_delivered: Option<FrameSeq>,
}

impl ViewLane {
    fn new(view: ViewId, rank: Rank, asynchronicity: usize) -> PipelineResult<Self> {
        Ok(Self {
            pipeline: AsyncReadbackPipeline::new(view, rank, asynchronicity)?,
            context: CompositeContext::new(view),
            last_delivered: None,
        })
    }
}

/// One rank's end of the distributed frame pipeline.
///
/// Every rank calls [`FramePipeline::render`] once per tick. The ranks agree on the frame state,
/// render locally, read back asynchronously and composite frames in begin order once their
/// transfers finished everywhere.
pub struct FramePipeline {
    cfg: PipelineConfig,
    comm: Box<dyn Communicator>,
    renderer: Box<dyn LocalRenderer>,
    device: Box<dyn ReadbackDevice>,
    sink: Box<dyn CompositeSink>,

    registry: ViewRegistry,
    sync: CrossRankSynchronizer,
    compositor: SortLastCompositor,
    pool: SlotPool,
    lanes: Vec<ViewLane>,
    stats: PipelineStats,
}

impl std::fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("rank", &self.comm.rank())
            .field("size", &self.comm.size())
            .field("views", &self.lanes.len())
            .field("state", self.sync.state())
            .finish_non_exhaustive()
    }
}

impl FramePipeline {
    /// Assemble a pipeline for this rank.
    pub fn new(
        cfg: PipelineConfig,
        comm: Box<dyn Communicator>,
        renderer: Box<dyn LocalRenderer>,
        device: Box<dyn ReadbackDevice>,
        sink: Box<dyn CompositeSink>,
    ) -> PipelineResult<Self> {
        cfg.validate()?;
        if cfg.authority_rank >= comm.size() {
            return Err(PipelineError::validation(format!(
                "authority rank {} out of range for {} ranks",
                cfg.authority_rank,
                comm.size()
            )));
        }
        let timeout = cfg.sync_timeout();
        Ok(Self {
            sync: CrossRankSynchronizer::new(
                cfg.authority_rank,
                timeout,
                cfg.continuous_rendering,
            ),
            compositor: SortLastCompositor::new(cfg.strategy, cfg.background, timeout),
            pool: SlotPool::new(cfg.slot_pool_opts()),
            registry: ViewRegistry::new(),
            lanes: Vec::new(),
            stats: PipelineStats::default(),
            cfg,
            comm,
            renderer,
            device,
            sink,
        })
    }

    /// This rank.
    pub fn rank(&self) -> Rank {
        self.comm.rank()
    }

    /// `true` on the rank whose registry and timestep requests are authoritative.
    pub fn is_authority(&self) -> bool {
        self.comm.rank() == self.cfg.authority_rank
    }

    /// Active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Committed views.
    pub fn registry(&self) -> &ViewRegistry {
        &self.registry
    }

    /// Last agreed frame state.
    pub fn state(&self) -> &GlobalFrameState {
        self.sync.state()
    }

    /// Counters, including the slot pool's.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            slot_pool: self.pool.stats(),
            ..self.stats.clone()
        }
    }

    /// Slot states of `view`'s ring.
    pub fn slot_states(&self, view: ViewId) -> Option<Vec<SlotState>> {
        self.lanes
            .get(view.index())
            .map(|l| l.pipeline.slot_states())
    }

    /// Outstanding frames of `view`, oldest first.
    pub fn outstanding_seqs(&self, view: ViewId) -> Vec<FrameSeq> {
        self.lanes
            .get(view.index())
            .map(|l| l.pipeline.outstanding_seqs())
            .unwrap_or_default()
    }

    /// Stage a view count. Takes effect at the next agreement.
    pub fn set_view_count(&mut self, n: usize) -> PipelineResult<()> {
        self.registry.set_view_count(n)
    }

    /// Stage camera parameters for `view`. Takes effect at the next agreement.
    pub fn update_view(&mut self, view: ViewId, params: ViewParams) -> PipelineResult<()> {
        self.registry.update_view(view, params)
    }

    /// Ask for a timestep. Honored on the authority only.
    pub fn request_timestep(&mut self, t: u32) {
        self.sync.request_timestep(t);
    }

    /// Flag a local scene change so the next tick renders.
    pub fn set_modified(&mut self) {
        self.sync.set_modified(true);
    }

    /// Toggle continuous rendering on this rank's synchronizer.
    pub fn set_continuous(&mut self, on: bool) {
        self.cfg.continuous_rendering = on;
        self.sync.set_continuous(on);
    }

    fn capacity(&self) -> usize {
        self.cfg.asynchronicity + 1
    }

    /// Run one tick. Collective: every rank must call it.
    #[tracing::instrument(level = "debug", skip_all, fields(rank = self.comm.rank(), tick = self.stats.ticks + 1))]
    pub fn render(&mut self) -> PipelineResult<TickOutcome> {
        self.stats.ticks += 1;

        let mut composited = match self.composite_ready() {
            Ok(n) => n,
            Err(e) if e.is_frame_local() => {
                tracing::warn!(error = %e, "ready agreement failed, abandoning tick");
                self.stats.frames_abandoned += 1;
                return Ok(TickOutcome::Abandoned);
            }
            Err(e) => return Err(e),
        };

        if self.lanes.iter().any(|l| l.pipeline.would_block()) {
            self.stats.blocked_ticks += 1;
            tracing::debug!("ring full, waiting for transfers");
            return Ok(TickOutcome::Blocked { composited });
        }

        self.sync.set_local_bounds(self.renderer.local_bounds());
        let outcome = match self.sync.synchronize(
            self.comm.as_mut(),
            &mut self.registry,
            self.renderer.num_timesteps(),
        ) {
            Ok(o) => o,
            Err(e) if e.is_frame_local() => {
                tracing::warn!(error = %e, "frame abandoned");
                self.stats.frames_abandoned += 1;
                return Ok(TickOutcome::Abandoned);
            }
            Err(e) => return Err(e),
        };

        if outcome.change.requires_flush() {
            composited += self.flush()?;
            self.apply_view_change(&outcome.change)?;
        }

        if !outcome.render {
            self.stats.frames_skipped += 1;
            return Ok(TickOutcome::Skipped { composited });
        }

        let state = outcome.state;
        let local = BoundingSphere::from_aabb(&self.renderer.local_bounds());
        let views = self.registry.views().to_vec();
        for (lane, view) in views.into_iter().enumerate() {
            self.begin_view(lane, view, &state, &local)?;
        }

        if self.cfg.asynchronicity == 0 {
            let n = self.drain_all()?;
            for _ in 0..n {
                self.frame_delay();
            }
            composited += n;
        }
        Ok(TickOutcome::Rendered {
            seq: state.seq,
            composited,
        })
    }

    /// Drain and composite every outstanding frame, oldest first. Collective.
    pub fn flush(&mut self) -> PipelineResult<usize> {
        let n = self.drain_all()?;
        self.stats.flushes += 1;
        tracing::info!(frames = n, "pipeline flushed");
        Ok(n)
    }

    /// Flush and give every buffer back to the pool. Collective.
    pub fn shutdown(&mut self) -> PipelineResult<PipelineStats> {
        self.flush()?;
        for lane in &mut self.lanes {
            lane.pipeline.teardown(&mut self.pool);
        }
        Ok(self.stats())
    }

    fn begin_view(
        &mut self,
        lane: usize,
        view: View,
        state: &GlobalFrameState,
        local: &BoundingSphere,
    ) -> PipelineResult<()> {
        let sparse = self.cfg.sparse_readback;
        let Some(l) = self.lanes.get_mut(lane) else {
            return Err(PipelineError::validation(format!("no lane for view {}", view.id.0)));
        };
        let ticket = FrameTicket {
            frame: state.clone(),
            view: view.clone(),
        };
        let idx = match l.pipeline.begin_frame(ticket, &mut self.pool)? {
            BeginFrame::Slot(idx) => idx,
            BeginFrame::Blocked => {
                return Err(PipelineError::validation(format!(
                    "view {} ring is full after the block check",
                    view.id.0
                )));
            }
        };
        self.stats.frames_begun += 1;

        let viewport = if sparse {
            valid_rect(&view, local, self.cfg.tile_size)
        } else {
            view.full_rect()
        };
        match self.renderer.render(&view, state, viewport) {
            Ok(out) => match l
                .pipeline
                .submit_transfer(idx, out, sparse, self.device.as_mut())
            {
                Ok(()) => {}
                Err(e @ PipelineError::StateMismatch(_)) => {
                    tracing::warn!(view = view.id.0, seq = state.seq.0, error = %e, "render output rejected");
                    l.context.invalidate();
                }
                Err(e) => return Err(e),
            },
            Err(e) => {
                tracing::warn!(view = view.id.0, seq = state.seq.0, error = %e, "local render failed");
                l.pipeline.mark_failed(idx, e.to_string())?;
            }
        }
        Ok(())
    }

    /// Composite up to `K + 1` frames that are ready on every rank.
    ///
    /// Runs on every tick, also with nothing outstanding, so that ranks stay in step.
    fn composite_ready(&mut self) -> PipelineResult<usize> {
        let local = self
            .lanes
            .iter_mut()
            .map(|l| l.pipeline.ready_prefix())
            .min()
            .unwrap_or(0) as u64;
        let tag = Tag::new(Channel::Ready, self.stats.ticks);
        let timeout = self.cfg.sync_timeout();
        let mut coll = Collective::new(self.comm.as_mut(), self.cfg.authority_rank, timeout)?;
        let agreed = coll.all_reduce(tag, local, u64::min)?;

        let n = usize::try_from(agreed)
            .unwrap_or(usize::MAX)
            .min(self.capacity());
        tracing::debug!(local, agreed, "ready frames agreed");
        for _ in 0..n {
            self.composite_oldest()?;
            self.frame_delay();
        }
        Ok(n)
    }

    fn frame_delay(&self) {
        if self.cfg.frame_delay_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(self.cfg.frame_delay_ms));
        }
    }

    fn drain_all(&mut self) -> PipelineResult<usize> {
        let mode = match self.cfg.drain_timeout() {
            Some(t) => DrainMode::Bounded(t),
            None => DrainMode::Blocking,
        };
        let mut n = 0;
        while self.lanes.iter().any(|l| l.pipeline.outstanding() > 0) {
            for lane in &mut self.lanes {
                if let Some(idx) = lane.pipeline.front()
                    && let Err(e) = lane.pipeline.drain(idx, mode)
                {
                    tracing::warn!(view = lane.pipeline.view().0, error = %e, "drain failed");
                }
            }
            if !self.composite_oldest()? {
                break;
            }
            n += 1;
        }
        Ok(n)
    }

    /// Composite the oldest frame of every view, then report frame completion.
    fn composite_oldest(&mut self) -> PipelineResult<bool> {
        let mut seq = None;
        let mut delivered = false;
        for v in 0..self.lanes.len() {
            if let Some((s, d)) = self.composite_front(v)? {
                seq = Some(s);
                delivered |= d;
            }
        }
        let Some(seq) = seq else {
            return Ok(false);
        };
        if delivered {
            self.sink.on_frame_complete(seq)?;
        }
        Ok(true)
    }

    fn composite_front(&mut self, v: usize) -> PipelineResult<Option<(FrameSeq, bool)>> {
        let timeout = self.cfg.sync_timeout();
        let (policy, authority) = (self.cfg.tile_policy, self.cfg.authority_rank);
        let Some(lane) = self.lanes.get_mut(v) else {
            return Ok(None);
        };
        let Some(taken) = lane.pipeline.take_front_for_composite()? else {
            return Ok(None);
        };
        let seq = taken.ticket.seq();
        let view = &taken.ticket.view;

        let local = taken.contribution.as_ref().map_err(Clone::clone);
        let result = lane
            .context
            .ensure(
                self.comm.as_mut(),
                policy,
                authority,
                view.width,
                view.height,
                timeout,
            )
            .and_then(|_| {
                self.compositor
                    .composite(self.comm.as_mut(), &mut lane.context, seq, local)
            });
        lane.pipeline
            .release(taken.slot, taken.contribution.ok(), &mut self.pool)?;

        match result {
            Ok(CompositeOutcome::Delivered(tile)) => {
                self.stats.frames_composited += 1;
                if lane.last_delivered.is_some_and(|last| seq <= last) {
                    tracing::warn!(view = view.id.0, seq = seq.0, "frame already delivered");
                    return Ok(Some((seq, false)));
                }
                lane.last_delivered = Some(seq);
                let image = CompositedImage {
                    view: view.id,
                    seq,
                    timestep: taken.ticket.frame.timestep,
                    width: view.width,
                    height: view.height,
                    tile: tile.rect,
                    color: tile.color,
                    depth: tile.depth,
                    view_state: view.clone(),
                };
                self.sink.on_view_composited(view.id, &image, seq)?;
                self.stats.frames_delivered += 1;
                tracing::debug!(view = view.id.0, seq = seq.0, "frame delivered");
                Ok(Some((seq, true)))
            }
            Ok(CompositeOutcome::NotOwner) => {
                self.stats.frames_composited += 1;
                Ok(Some((seq, false)))
            }
            Ok(CompositeOutcome::Dropped(reason)) => {
                tracing::warn!(view = view.id.0, seq = seq.0, %reason, "frame dropped");
                self.stats.frames_dropped += 1;
                Ok(Some((seq, false)))
            }
            Err(e) if e.is_frame_local() => {
                tracing::warn!(view = view.id.0, seq = seq.0, error = %e, "composite failed, frame dropped");
                self.stats.frames_dropped += 1;
                lane.context.invalidate();
                Ok(Some((seq, false)))
            }
            Err(e) => Err(e),
        }
    }

    fn apply_view_change(&mut self, change: &ViewSetChange) -> PipelineResult<()> {
        let n = self.registry.view_count();
        if self.lanes.len() > n {
            for mut lane in self.lanes.split_off(n) {
                lane.pipeline.teardown(&mut self.pool);
            }
        }
        for id in &change.resized {
            if let Some(lane) = self.lanes.get_mut(id.index()) {
                lane.pipeline.teardown(&mut self.pool);
                lane.context.invalidate();
            }
        }
        let rank = self.comm.rank();
        while self.lanes.len() < n {
            let id = ViewId(self.lanes.len() as u32);
            self.lanes
                .push(ViewLane::new(id, rank, self.cfg.asynchronicity)?);
        }
        tracing::info!(
            views = n,
            added = change.added.len(),
            removed = change.removed.len(),
            resized = change.resized.len(),
            "view lanes rebuilt"
        );
        Ok(())
    }
}
