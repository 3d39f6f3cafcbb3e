//! Local renderer contract and two reference renderers.

use crate::foundation::core::{Aabb, MAX_DEPTH, PixelRect, rgba_len};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::sync::GlobalFrameState;
use crate::view::View;

pub(crate) mod solid;
pub(crate) mod spheres;

pub use solid::SolidRenderer;
pub use spheres::{Sphere, SphereRenderer, rank_color};

/// Framebuffer produced by a local render.
///
/// Buffers cover the full view (row-major, top-left origin); only `viewport` was drawn.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderOutput {
    /// Framebuffer width.
    pub width: u32,
    /// Framebuffer height.
    pub height: u32,
    /// Drawn sub-rectangle.
    pub viewport: PixelRect,
    /// RGBA8 color.
    pub color: Vec<u8>,
    /// Window-space depth in `[0, 1]`.
    pub depth: Vec<f32>,
}

impl RenderOutput {
    /// Framebuffer cleared to transparent black and maximum depth.
    pub fn cleared(width: u32, height: u32, viewport: PixelRect) -> PipelineResult<Self> {
        let bytes = rgba_len(width, height)?;
        Ok(Self {
            width,
            height,
            viewport,
            color: vec![0; bytes],
            depth: vec![MAX_DEPTH; bytes / 4],
        })
    }

    /// Check buffer lengths against the dimensions.
    pub fn check_buffers(&self) -> PipelineResult<()> {
        let bytes = rgba_len(self.width, self.height)?;
        if self.color.len() != bytes || self.depth.len() != bytes / 4 {
            return Err(PipelineError::state_mismatch(format!(
                "render output buffers ({} color bytes, {} depth values) do not match {}x{}",
                self.color.len(),
                self.depth.len(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }
}

/// Produces this rank's color and depth for one view.
///
/// Called synchronously by the scheduler with the agreed view and frame state.
pub trait LocalRenderer: Send {
    /// Render `view` restricted to `viewport`.
    fn render(
        &mut self,
        view: &View,
        frame: &GlobalFrameState,
        viewport: PixelRect,
    ) -> PipelineResult<RenderOutput>;

    /// Object-space bounds of the local geometry (empty when there is none).
    fn local_bounds(&self) -> Aabb;

    /// Number of timesteps of the local data.
    fn num_timesteps(&self) -> u32 {
        1
    }
}
