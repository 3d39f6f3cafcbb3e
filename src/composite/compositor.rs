use crate::comm::{Channel, Communicator, Tag};
use crate::composite::context::CompositeContext;
use crate::composite::contribution::Contribution;
use crate::composite::merge::{Fragment, decode_fragment, encode_fragment, merge_fragments};
use crate::foundation::core::{FrameSeq, PixelRect, Rgba8};
use crate::foundation::error::PipelineResult;
use std::time::Duration;

/// How fragments travel between ranks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeStrategy {
    /// Every rank sends its clipped fragment straight to each tile owner, which folds them in
    /// rank order.
    #[default]
    Sequential,
    /// Pairwise reduction towards rank 0, which forwards each tile to its owner.
    BinaryTree,
}

/// Final pixels of one tile.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositedTile {
    /// Tile rectangle in view coordinates.
    pub rect: PixelRect,
    /// RGBA8, `rect.area() * 4` bytes, top-left origin.
    pub color: Vec<u8>,
    /// Depth, `rect.area()` values.
    pub depth: Vec<f32>,
}

/// What one rank got out of a composite.
#[derive(Clone, Debug, PartialEq)]
pub enum CompositeOutcome {
    /// This rank owns a tile and received its pixels.
    Delivered(CompositedTile),
    /// This rank owns a tile but at least one contribution was missing; the frame is discarded.
    Dropped(String),
    /// This rank owns no tile of the view.
    NotOwner,
}

/// Depth-ordered reduction of all ranks' contributions of a view.
#[derive(Clone, Debug)]
pub struct SortLastCompositor {
    strategy: CompositeStrategy,
    background: Rgba8,
    timeout: Duration,
}

impl SortLastCompositor {
    /// New compositor. `timeout` bounds every fragment receive.
    pub fn new(strategy: CompositeStrategy, background: Rgba8, timeout: Duration) -> Self {
        Self {
            strategy,
            background,
            timeout,
        }
    }

    /// Strategy in use.
    pub fn strategy(&self) -> CompositeStrategy {
        self.strategy
    }

    /// Composite frame `seq` of the context's view. Collective over all ranks.
    ///
    /// `local` is this rank's contribution or the reason it has none. A contribution whose
    /// dimensions disagree with the context is treated as missing and invalidates the context.
    pub fn composite(
        &self,
        comm: &mut dyn Communicator,
        ctx: &mut CompositeContext,
        seq: FrameSeq,
        local: Result<&Contribution, String>,
    ) -> PipelineResult<CompositeOutcome> {
        let (w, h) = ctx.dims();
        let (fragment, mut reason) = match local {
            Ok(c) if c.fits(w, h) && c.check().is_ok() => {
                (Fragment::from_contribution(c, PixelRect::full(w, h)), None)
            }
            Ok(c) => {
                tracing::warn!(
                    view = ctx.view().0,
                    got_width = c.width,
                    got_height = c.height,
                    width = w,
                    height = h,
                    "contribution does not match composite context"
                );
                ctx.invalidate();
                let why = format!("contribution is {}x{}, context is {w}x{h}", c.width, c.height);
                (Fragment::uncovered(PixelRect::empty()), Some(why))
            }
            Err(e) => (Fragment::uncovered(PixelRect::empty()), Some(e)),
        };

        let tag = Tag::new(Channel::Composite, seq.0).with_sub(ctx.view().0);
        let missing = reason.is_some();
        let got = match self.strategy {
            CompositeStrategy::Sequential => self.direct_send(comm, ctx, tag, &fragment, missing)?,
            CompositeStrategy::BinaryTree => self.tree(comm, ctx, tag, fragment, missing)?,
        };
        let Some((rect, merged, dropped)) = got else {
            return Ok(CompositeOutcome::NotOwner);
        };
        if dropped {
            let why = reason
                .take()
                .unwrap_or_else(|| "a peer had no contribution".to_owned());
            tracing::debug!(view = ctx.view().0, seq = seq.0, reason = %why, "composite dropped");
            return Ok(CompositeOutcome::Dropped(why));
        }
        let (color, depth) = merged.resolve(rect, self.background);
        Ok(CompositeOutcome::Delivered(CompositedTile { rect, color, depth }))
    }

    fn direct_send(
        &self,
        comm: &mut dyn Communicator,
        ctx: &CompositeContext,
        tag: Tag,
        fragment: &Fragment,
        dropped: bool,
    ) -> PipelineResult<Option<(PixelRect, Fragment, bool)>> {
        let rank = comm.rank();
        for tile in ctx.layout().tiles() {
            if tile.owner != rank {
                comm.send(tile.owner, tag, encode_fragment(&fragment.clip(tile.rect), dropped))?;
            }
        }
        let Some(tile) = ctx.layout().tile_of(rank).copied() else {
            return Ok(None);
        };

        let mut acc = Fragment::uncovered(tile.rect);
        let mut any_dropped = false;
        for src in 0..comm.size() {
            let (part, d) = if src == rank {
                (fragment.clip(tile.rect), dropped)
            } else {
                decode_fragment(&comm.recv(src, tag, self.timeout)?)?
            };
            any_dropped |= d;
            acc.merge_from(&part);
        }
        Ok(Some((tile.rect, acc, any_dropped)))
    }

    fn tree(
        &self,
        comm: &mut dyn Communicator,
        ctx: &CompositeContext,
        tag: Tag,
        fragment: Fragment,
        dropped: bool,
    ) -> PipelineResult<Option<(PixelRect, Fragment, bool)>> {
        let rank = comm.rank();
        let n = comm.size();
        let mut acc = fragment;
        let mut any_dropped = dropped;

        let mut step = 1;
        while step < n {
            if rank % (2 * step) == 0 {
                let partner = rank + step;
                if partner < n {
                    let (part, d) = decode_fragment(&comm.recv(partner, tag, self.timeout)?)?;
                    acc = merge_fragments(&acc, &part);
                    any_dropped |= d;
                }
            } else {
                comm.send(rank - step, tag, encode_fragment(&acc, any_dropped))?;
                break;
            }
            step *= 2;
        }

        let forward = tag.reply();
        if rank == 0 {
            for tile in ctx.layout().tiles() {
                if tile.owner != 0 {
                    let part = encode_fragment(&acc.clip(tile.rect), any_dropped);
                    comm.send(tile.owner, forward, part)?;
                }
            }
        }
        let Some(tile) = ctx.layout().tile_of(rank).copied() else {
            return Ok(None);
        };
        let (part, d) = if rank == 0 {
            (acc.clip(tile.rect), any_dropped)
        } else {
            decode_fragment(&comm.recv(0, forward, self.timeout)?)?
        };
        Ok(Some((tile.rect, part, d)))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/composite/compositor.rs"]
mod tests;
