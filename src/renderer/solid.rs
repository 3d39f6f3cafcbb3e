use crate::foundation::core::{Aabb, PixelRect, Rgba8};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::renderer::{LocalRenderer, RenderOutput};
use crate::sync::GlobalFrameState;
use crate::view::View;

/// Fills a fixed window rectangle with one color at one depth.
///
/// Independent of the camera, which makes composite results easy to predict.
#[derive(Clone, Debug)]
pub struct SolidRenderer {
    rect: PixelRect,
    color: Rgba8,
    depth: f32,
    timestep_colors: Vec<Rgba8>,
    bounds: Aabb,
    frames: u64,
}

impl SolidRenderer {
    /// Fill `rect` (clipped to each view) with `color` at `depth`.
    pub fn new(rect: PixelRect, color: Rgba8, depth: f32) -> Self {
        Self {
            rect,
            color,
            depth,
            timestep_colors: Vec::new(),
            bounds: Aabb::empty(),
            frames: 0,
        }
    }

    /// Use `colors[t]` when rendering timestep `t`; the count becomes the timestep count.
    pub fn with_timestep_colors(mut self, colors: Vec<Rgba8>) -> Self {
        self.timestep_colors = colors;
        self
    }

    /// Report `bounds` as the local geometry.
    pub fn with_bounds(mut self, bounds: Aabb) -> Self {
        self.bounds = bounds;
        self
    }

    /// Move the rectangle.
    pub fn set_rect(&mut self, rect: PixelRect) {
        self.rect = rect;
    }

    /// Number of `render` calls so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn color_for(&self, timestep: u32) -> Rgba8 {
        self.timestep_colors
            .get(timestep as usize)
            .copied()
            .unwrap_or(self.color)
    }
}

impl LocalRenderer for SolidRenderer {
    fn render(
        &mut self,
        view: &View,
        frame: &GlobalFrameState,
        viewport: PixelRect,
    ) -> PipelineResult<RenderOutput> {
        if !view.full_rect().contains_rect(viewport) {
            return Err(PipelineError::validation(format!(
                "viewport {viewport:?} exceeds {}x{}",
                view.width, view.height
            )));
        }
        self.frames += 1;
        let mut out = RenderOutput::cleared(view.width, view.height, viewport)?;
        let area = self.rect.intersect(viewport);
        let color = self.color_for(frame.timestep);
        for y in area.y..area.bottom() {
            let row = PixelRect::pixel_index(view.width, area.x, y);
            for i in row..row + area.width as usize {
                out.color[i * 4..i * 4 + 4].copy_from_slice(&color);
                out.depth[i] = self.depth;
            }
        }
        Ok(out)
    }

    fn local_bounds(&self) -> Aabb {
        self.bounds
    }

    fn num_timesteps(&self) -> u32 {
        (self.timestep_colors.len() as u32).max(1)
    }
}
