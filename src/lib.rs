//! Sortlast composes the images of rank-parallel renderers into one picture per view.
//!
//! Every rank renders its share of the scene for each view, reads color and depth back
//! asynchronously into a small ring of frame slots, and the ranks merge their contributions by
//! per-pixel depth (sort-last compositing). Once per frame the ranks agree on cameras, timestep
//! and scene bounds, so every contribution of a frame was rendered with the same state.
//!
//! - Configure a [`PipelineConfig`]
//! - Create a [`FramePipeline`] per rank with a [`Communicator`], a [`LocalRenderer`], a
//!   [`ReadbackDevice`] and a [`CompositeSink`]
//! - Call [`FramePipeline::render`] on every rank once per tick
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod foundation;

/// Rank-to-rank transport and collectives.
pub mod comm;
/// Depth compositing of per-rank contributions.
pub mod composite;
/// Pipeline configuration.
pub mod config;
/// Frame slots and asynchronous readback.
pub mod readback;
/// Local renderer contract and reference renderers.
pub mod renderer;
/// Per-tick orchestration.
pub mod scheduler;
/// Consumers of composited images.
pub mod sink;
/// Cross-rank frame agreement.
pub mod sync;
/// Views and the view registry.
pub mod view;

pub use crate::foundation::core::{
    Aabb, BoundingSphere, DMat4, DVec3, DVec4, FrameSeq, MAX_DEPTH, PixelRect, Rank, Rgba8,
    ViewId,
};
pub use crate::foundation::error::{PipelineError, PipelineResult};

pub use crate::comm::{Communicator, LocalCluster, LocalComm, SoloComm};
pub use crate::composite::{CompositeStrategy, Contribution, SortLastCompositor, TilePolicy};
pub use crate::config::PipelineConfig;
pub use crate::readback::{CpuReadbackDevice, DeferredReadbackDevice, ReadbackDevice};
pub use crate::renderer::{LocalRenderer, RenderOutput, SolidRenderer, Sphere, SphereRenderer};
pub use crate::scheduler::{FramePipeline, PipelineStats, TickOutcome};
pub use crate::sink::{CompositeSink, CompositedImage, InMemorySink, PngSink};
pub use crate::sync::{CrossRankSynchronizer, GlobalFrameState};
pub use crate::view::{Light, View, ViewParams, ViewRegistry};
