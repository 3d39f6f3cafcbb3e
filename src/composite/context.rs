use crate::comm::{Channel, Collective, Communicator, Tag};
use crate::foundation::core::{PixelRect, Rank, ViewId};
use crate::foundation::error::{PipelineError, PipelineResult};
use smallvec::SmallVec;
use std::time::Duration;

/// Destination rectangle of the final image and the rank that receives it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Tile {
    /// Receiving rank.
    pub owner: Rank,
    /// Rectangle in view coordinates.
    pub rect: PixelRect,
}

/// How the final image of a view is split among display ranks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TilePolicy {
    /// One tile covering the view, owned by the authority rank.
    #[default]
    Authority,
    /// Horizontal bands, band `i` owned by rank `i`.
    Bands,
}

impl TilePolicy {
    /// The tile `rank` claims for a `width x height` view.
    pub fn local_tile(
        self,
        rank: Rank,
        size: usize,
        authority: Rank,
        width: u32,
        height: u32,
    ) -> Option<Tile> {
        match self {
            TilePolicy::Authority => (rank == authority).then_some(Tile {
                owner: rank,
                rect: PixelRect::full(width, height),
            }),
            TilePolicy::Bands => {
                let n = size.max(1) as u64;
                let y0 = (rank as u64 * height as u64 / n) as u32;
                let y1 = ((rank as u64 + 1) * height as u64 / n) as u32;
                let rect = PixelRect::new(0, y0, width, y1 - y0);
                (!rect.is_empty()).then_some(Tile { owner: rank, rect })
            }
        }
    }
}

/// Set of tiles of one view. Owners are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TileLayout {
    tiles: SmallVec<[Tile; 1]>,
}

impl TileLayout {
    /// Build from per-rank claims and check them against the view.
    pub fn from_claims(
        claims: impl IntoIterator<Item = Option<Tile>>,
        width: u32,
        height: u32,
    ) -> PipelineResult<Self> {
        let full = PixelRect::full(width, height);
        let mut tiles: SmallVec<[Tile; 1]> = SmallVec::new();
        for t in claims.into_iter().flatten() {
            if !full.contains_rect(t.rect) {
                return Err(PipelineError::state_mismatch(format!(
                    "tile {:?} of rank {} exceeds {width}x{height}",
                    t.rect, t.owner
                )));
            }
            if tiles.iter().any(|o| o.owner == t.owner) {
                return Err(PipelineError::validation(format!(
                    "rank {} claims more than one tile",
                    t.owner
                )));
            }
            if tiles.iter().any(|o| !o.rect.intersect(t.rect).is_empty()) {
                return Err(PipelineError::validation(format!(
                    "tile {:?} of rank {} overlaps another tile",
                    t.rect, t.owner
                )));
            }
            tiles.push(t);
        }
        Ok(Self { tiles })
    }

    /// All tiles in owner order.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// The tile owned by `rank`.
    pub fn tile_of(&self, rank: Rank) -> Option<&Tile> {
        self.tiles.iter().find(|t| t.owner == rank)
    }
}

/// Per-view compositing state: dimensions and tile layout.
///
/// Compositing takes `&mut CompositeContext`, so one view is never composited twice at once.
#[derive(Debug)]
pub struct CompositeContext {
    view: ViewId,
    width: u32,
    height: u32,
    layout: TileLayout,
    valid: bool,
    generation: u64,
    round: u64,
}

impl CompositeContext {
    /// Context that will be built on first [`CompositeContext::ensure`].
    pub fn new(view: ViewId) -> Self {
        Self {
            view,
            width: 0,
            height: 0,
            layout: TileLayout::default(),
            valid: false,
            generation: 0,
            round: 0,
        }
    }

    /// View served.
    pub fn view(&self) -> ViewId {
        self.view
    }

    /// Current dimensions.
    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Current layout.
    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    /// Number of rebuilds so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `true` until invalidated or resized.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Force a rebuild at the next [`CompositeContext::ensure`] on every rank.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Rebuild collectively when any rank needs it.
    ///
    /// `all_reduce(max)` of the per-rank reset flags, then `all_gather` of the local tile claims.
    /// Returns `true` when a rebuild happened.
    pub fn ensure(
        &mut self,
        comm: &mut dyn Communicator,
        policy: TilePolicy,
        authority: Rank,
        width: u32,
        height: u32,
        timeout: Duration,
    ) -> PipelineResult<bool> {
        self.round += 1;
        let base = Tag::new(Channel::Context, self.round * 2).with_sub(self.view.0);
        let claims_tag = Tag::new(Channel::Context, self.round * 2 + 1).with_sub(self.view.0);

        let rank = comm.rank();
        let size = comm.size();
        let need = !self.valid || self.width != width || self.height != height;
        let mut coll = Collective::new(comm, authority, timeout)?;
        let any = coll.all_reduce(base, u8::from(need), u8::max)?;
        if any == 0 {
            return Ok(false);
        }

        let claim = policy.local_tile(rank, size, authority, width, height);
        let claims = coll.all_gather(claims_tag, &claim)?;
        self.layout = TileLayout::from_claims(claims, width, height)?;
        self.width = width;
        self.height = height;
        self.valid = true;
        self.generation += 1;
        tracing::info!(
            view = self.view.0,
            width,
            height,
            tiles = self.layout.tiles().len(),
            generation = self.generation,
            "composite context rebuilt"
        );
        Ok(true)
    }
}
