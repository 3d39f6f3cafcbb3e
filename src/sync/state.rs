use crate::foundation::core::{Aabb, BoundingSphere, FrameSeq};
use crate::view::View;

/// Per-frame state every rank renders with.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GlobalFrameState {
    /// Frame sequence number. Grows by one for every rendered frame.
    pub seq: FrameSeq,
    /// Active timestep, `< num_timesteps`.
    pub timestep: u32,
    /// Largest timestep count reported by any rank.
    pub num_timesteps: u32,
    /// Scene bounding sphere over all ranks.
    pub bounds: BoundingSphere,
}

impl Default for GlobalFrameState {
    fn default() -> Self {
        Self {
            seq: FrameSeq(0),
            timestep: 0,
            num_timesteps: 1,
            bounds: BoundingSphere::empty(),
        }
    }
}

/// What each rank contributes to the agreement.
///
/// Empty bounds travel as `None`; JSON has no infinities.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct RankReport {
    pub(crate) num_timesteps: u32,
    pub(crate) bounds_dirty: bool,
    pub(crate) bounds: Option<Aabb>,
    pub(crate) modified: bool,
}

/// The authority's decision for one frame.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct FrameProposal {
    pub(crate) state: GlobalFrameState,
    pub(crate) views: Vec<View>,
    pub(crate) render: bool,
}
