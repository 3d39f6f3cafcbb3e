use crate::foundation::core::{MAX_DEPTH, PixelRect, Rank, Rgba8, rgba_len};
use crate::foundation::error::{PipelineError, PipelineResult};

/// One rank's color and depth for one view of one frame.
///
/// Buffers are full-view sized, row-major, top-left origin. Only pixels inside `valid` are
/// meaningful; the rest may hold data from an earlier frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Contribution {
    /// Producing rank.
    pub rank: Rank,
    /// View width.
    pub width: u32,
    /// View height.
    pub height: u32,
    /// Rectangle holding this frame's pixels.
    pub valid: PixelRect,
    /// RGBA8, `width * height * 4` bytes.
    pub color: Vec<u8>,
    /// Window-space depth in `[0, 1]`, `width * height` values.
    pub depth: Vec<f32>,
}

impl Contribution {
    /// Cleared `width x height` buffers with an empty valid rectangle.
    pub fn new(rank: Rank, width: u32, height: u32) -> PipelineResult<Self> {
        let bytes = rgba_len(width, height)?;
        Ok(Self {
            rank,
            width,
            height,
            valid: PixelRect::empty(),
            color: vec![0; bytes],
            depth: vec![MAX_DEPTH; bytes / 4],
        })
    }

    /// Heap bytes held by a `width x height` contribution.
    pub fn byte_len(width: u32, height: u32) -> usize {
        let px = (width as usize).saturating_mul(height as usize);
        px.saturating_mul(4 + std::mem::size_of::<f32>())
    }

    /// Heap bytes held by this contribution.
    pub fn heap_bytes(&self) -> usize {
        self.color.len() + self.depth.len() * std::mem::size_of::<f32>()
    }

    /// `true` when the buffers fit `width x height`.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    /// Color and depth at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> (Rgba8, f32) {
        let i = PixelRect::pixel_index(self.width, x, y);
        let c = &self.color[i * 4..i * 4 + 4];
        ([c[0], c[1], c[2], c[3]], self.depth[i])
    }

    /// Check buffer sizes and that `valid` lies inside the view.
    pub fn check(&self) -> PipelineResult<()> {
        let bytes = rgba_len(self.width, self.height)?;
        if self.color.len() != bytes || self.depth.len() != bytes / 4 {
            return Err(PipelineError::state_mismatch(format!(
                "rank {} buffers do not match {}x{}",
                self.rank, self.width, self.height
            )));
        }
        if !PixelRect::full(self.width, self.height).contains_rect(self.valid) {
            return Err(PipelineError::state_mismatch(format!(
                "rank {} valid rect {:?} exceeds {}x{}",
                self.rank, self.valid, self.width, self.height
            )));
        }
        Ok(())
    }
}
