//! Sort-last compositing: per-rank contributions, depth merge and tile delivery.

pub(crate) mod compositor;
pub(crate) mod context;
pub(crate) mod contribution;
pub(crate) mod merge;
pub(crate) mod sparse;

pub use compositor::{CompositeOutcome, CompositeStrategy, CompositedTile, SortLastCompositor};
pub use context::{CompositeContext, Tile, TileLayout, TilePolicy};
pub use contribution::Contribution;
pub use merge::{
    Fragment, ReductionOrder, UNCOVERED, decode_fragment, encode_fragment, in_front,
    merge_fragments, reduce,
};
pub use sparse::valid_rect;
