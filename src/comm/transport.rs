use crate::foundation::core::Rank;
use crate::foundation::error::PipelineResult;
use std::time::Duration;

/// Logical stream a message belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Channel {
    /// Per-frame state agreement.
    Sync,
    /// Ready-prefix agreement before opportunistic compositing.
    Ready,
    /// Composite context rebuild.
    Context,
    /// Pixel fragments.
    Composite,
}

/// Message tag. Receives only match envelopes with an identical tag.
///
/// `round` must grow monotonically per `(channel, sub)` on every rank; envelopes from older rounds
/// are discarded when a newer round is received.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Tag {
    /// Stream.
    pub channel: Channel,
    /// Round within the stream.
    pub round: u64,
    /// Sub-stream (usually a view id).
    pub sub: u32,
    /// `true` for the root-to-peers half of a two-phase collective.
    pub reply: bool,
}

impl Tag {
    /// Tag for `round` on `channel`.
    pub fn new(channel: Channel, round: u64) -> Self {
        Self {
            channel,
            round,
            sub: 0,
            reply: false,
        }
    }

    /// Same tag on sub-stream `sub`.
    pub fn with_sub(self, sub: u32) -> Self {
        Self { sub, ..self }
    }

    /// The reply half of this tag.
    pub fn reply(self) -> Self {
        Self {
            reply: true,
            ..self
        }
    }

    /// `true` when `self` belongs to the same stream as `newer` but an earlier round.
    pub fn is_stale_for(&self, newer: &Tag) -> bool {
        self.channel == newer.channel && self.sub == newer.sub && self.round < newer.round
    }
}

/// Point-to-point message passing between ranks.
///
/// Collectives are built on top of this in [`crate::comm::Collective`].
pub trait Communicator: Send {
    /// This endpoint's rank.
    fn rank(&self) -> Rank;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Send without waiting for the receiver.
    fn send(&mut self, dst: Rank, tag: Tag, payload: Vec<u8>) -> PipelineResult<()>;

    /// Wait up to `timeout` for a message from `src` carrying `tag`.
    ///
    /// Fails on timeout, on peer disconnect and when `src` sent an abort for `tag`.
    fn recv(&mut self, src: Rank, tag: Tag, timeout: Duration) -> PipelineResult<Vec<u8>>;

    /// Tell `dst` that the operation identified by `tag` failed.
    fn abort(&mut self, dst: Rank, tag: Tag, reason: &str) -> PipelineResult<()>;
}
