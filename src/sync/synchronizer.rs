use crate::comm::{Channel, Collective, Communicator, Tag};
use crate::foundation::core::{Aabb, BoundingSphere, Rank};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::foundation::fingerprint::{FrameFingerprint, fingerprint_frame};
use crate::sync::state::{FrameProposal, GlobalFrameState, RankReport};
use crate::view::{ViewRegistry, ViewSetChange};
use std::time::Duration;

/// Sub-stream of the acknowledge and decision messages of a round.
const ACK_SUB: u32 = 1;

/// Result of one successful agreement.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncOutcome {
    /// The committed frame state.
    pub state: GlobalFrameState,
    /// Whether this frame must be rendered.
    pub render: bool,
    /// Structural view changes caused by the commit.
    pub change: ViewSetChange,
}

/// Agrees on views, timestep and bounds once per frame.
///
/// One gather of per-rank reports to the authority (max of timestep counts, OR of dirty and
/// modified flags, union of bounds) followed by one broadcast of the authority's proposal. Every
/// rank then acknowledges whether the proposal arrived and the authority broadcasts commit or
/// abort. A rank commits only on an explicit commit decision.
#[derive(Debug)]
pub struct CrossRankSynchronizer {
    authority: Rank,
    timeout: Duration,
    continuous: bool,
    round: u64,

    requested_timestep: u32,
    local_bounds: Aabb,
    bounds_dirty: bool,
    modified: bool,

    state: GlobalFrameState,
    last_fingerprint: Option<FrameFingerprint>,
}

impl CrossRankSynchronizer {
    /// New synchronizer. `continuous` forces a render every frame.
    pub fn new(authority: Rank, timeout: Duration, continuous: bool) -> Self {
        Self {
            authority,
            timeout,
            continuous,
            round: 0,
            requested_timestep: 0,
            local_bounds: Aabb::empty(),
            bounds_dirty: true,
            modified: false,
            state: GlobalFrameState::default(),
            last_fingerprint: None,
        }
    }

    /// Last committed state.
    pub fn state(&self) -> &GlobalFrameState {
        &self.state
    }

    /// Number of agreement rounds attempted so far.
    pub fn rounds(&self) -> u64 {
        self.round
    }

    /// Toggle continuous rendering.
    pub fn set_continuous(&mut self, on: bool) {
        self.continuous = on;
    }

    /// Ask for timestep `t`. Only the authority's request is honored.
    pub fn request_timestep(&mut self, t: u32) {
        self.requested_timestep = t;
    }

    /// Report this rank's geometry bounds. Marks bounds dirty when they changed.
    pub fn set_local_bounds(&mut self, bounds: Aabb) {
        let same = (bounds.is_empty() && self.local_bounds.is_empty()) || bounds == self.local_bounds;
        if !same {
            self.local_bounds = bounds;
            self.bounds_dirty = true;
        }
    }

    /// Flag a local scene modification that requires a new frame.
    pub fn set_modified(&mut self, modified: bool) {
        self.modified |= modified;
    }

    /// Run one agreement round and commit the result into `registry`.
    ///
    /// On error nothing is committed and the local inputs are kept for the next round.
    #[tracing::instrument(level = "debug", skip_all, fields(round = self.round + 1))]
    pub fn synchronize(
        &mut self,
        comm: &mut dyn Communicator,
        registry: &mut ViewRegistry,
        num_timesteps: u32,
    ) -> PipelineResult<SyncOutcome> {
        self.round += 1;
        let tag = Tag::new(Channel::Sync, self.round);
        let report = RankReport {
            num_timesteps: num_timesteps.max(1),
            bounds_dirty: self.bounds_dirty,
            bounds: (!self.local_bounds.is_empty()).then_some(self.local_bounds),
            modified: self.modified,
        };

        let mut coll = Collective::new(comm, self.authority, self.timeout)?;
        let size = coll.size();
        let gathered = coll
            .gather(tag, &report)
            .map_err(|e| PipelineError::sync(format!("gather of rank reports failed: {e}")))?;

        let ack = tag.with_sub(ACK_SUB);
        let proposal = match gathered {
            Some(reports) => {
                let (proposal, fp) = self.propose(&reports, registry);
                let sent = coll.broadcast(tag.reply(), Some(&proposal));
                if let Err(e) = &sent {
                    tracing::warn!(error = %e, "proposal did not reach every rank");
                }
                let acks = coll.gather(ack, &sent.is_ok()).map_err(|e| {
                    PipelineError::sync(format!("proposal acknowledgements incomplete: {e}"))
                })?;
                let commit = acks.is_some_and(|a| a.iter().all(|&ok| ok));
                // only a disconnected peer can miss the decision
                if let Err(e) = coll.broadcast(ack.reply(), Some(&commit)) {
                    tracing::warn!(error = %e, "commit decision did not reach every rank");
                }
                if !commit {
                    return Err(PipelineError::sync("a rank did not receive the frame proposal"));
                }
                self.last_fingerprint = Some(fp);
                proposal
            }
            None => {
                let received = coll.broadcast::<FrameProposal>(tag.reply(), None);
                let acked = coll.gather(ack, &received.is_ok());
                let proposal = received
                    .map_err(|e| PipelineError::sync(format!("frame proposal not received: {e}")))?;
                acked?;
                // the authority may wait a full timeout on every peer's acknowledgement
                let mut coll = Collective::new(comm, self.authority, self.timeout * size as u32)?;
                let commit = coll
                    .broadcast::<bool>(ack.reply(), None)
                    .map_err(|e| PipelineError::sync(format!("commit decision not received: {e}")))?;
                if !commit {
                    return Err(PipelineError::sync("frame proposal abandoned by the authority"));
                }
                proposal
            }
        };

        Ok(self.commit(proposal, registry))
    }

    fn propose(
        &self,
        reports: &[RankReport],
        registry: &ViewRegistry,
    ) -> (FrameProposal, FrameFingerprint) {
        let num_timesteps = reports.iter().map(|r| r.num_timesteps).max().unwrap_or(1);
        if reports.iter().any(|r| r.num_timesteps != num_timesteps) {
            tracing::warn!(
                num_timesteps,
                "ranks disagree on the number of timesteps, using the maximum"
            );
        }

        let bounds = if reports.iter().any(|r| r.bounds_dirty) {
            let union = reports
                .iter()
                .filter_map(|r| r.bounds.as_ref())
                .fold(Aabb::empty(), |acc, b| acc.union(b));
            BoundingSphere::from_aabb(&union)
        } else {
            self.state.bounds
        };
        let modified = reports.iter().any(|r| r.modified);

        let timestep = self.requested_timestep.min(num_timesteps - 1);
        let views = registry.staged_snapshot();
        let fp = fingerprint_frame(&views, timestep, num_timesteps, &bounds);
        let render = self.continuous || modified || self.last_fingerprint != Some(fp);

        let seq = if render {
            self.state.seq.next()
        } else {
            self.state.seq
        };
        tracing::debug!(seq = seq.0, timestep, render, "frame proposed");
        let proposal = FrameProposal {
            state: GlobalFrameState {
                seq,
                timestep,
                num_timesteps,
                bounds,
            },
            views,
            render,
        };
        (proposal, fp)
    }

    fn commit(&mut self, proposal: FrameProposal, registry: &mut ViewRegistry) -> SyncOutcome {
        self.bounds_dirty = false;
        self.modified = false;
        self.state = proposal.state.clone();
        let change = registry.commit(proposal.views);
        if change.requires_flush() {
            tracing::info!(
                added = change.added.len(),
                removed = change.removed.len(),
                resized = change.resized.len(),
                "view set changed"
            );
        }
        SyncOutcome {
            state: proposal.state,
            render: proposal.render,
            change,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/sync/synchronizer.rs"]
mod tests;
