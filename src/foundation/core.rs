use crate::foundation::error::{PipelineError, PipelineResult};

pub use glam::{DMat4, DVec3, DVec4};

/// Index of a process in the communicator (MPI-style rank).
pub type Rank = usize;

/// Depth written for pixels that no rank covers.
pub const MAX_DEPTH: f32 = 1.0;

/// RGBA8 color, straight alpha.
pub type Rgba8 = [u8; 4];

/// Identifier of a logical view (one camera / display / eye).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ViewId(pub u32);

impl ViewId {
    /// Position of the view in the registry.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Monotonic frame sequence number agreed by all ranks.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct FrameSeq(pub u64);

impl FrameSeq {
    /// The following sequence number.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Axis-aligned pixel rectangle, top-left origin, half-open on the right/bottom edges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PixelRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelRect {
    /// Construct a rectangle.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The full `width x height` rectangle at the origin.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// The empty rectangle.
    pub fn empty() -> Self {
        Self::default()
    }

    /// `true` when the rectangle contains no pixels.
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge.
    pub fn right(self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge.
    pub fn bottom(self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Number of pixels.
    pub fn area(self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    /// `true` when pixel `(x, y)` lies inside.
    pub fn contains(self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// `true` when `other` lies completely inside (empty rectangles are contained everywhere).
    pub fn contains_rect(self, other: PixelRect) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }

    /// Intersection; empty when disjoint.
    pub fn intersect(self, other: PixelRect) -> PixelRect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return PixelRect::empty();
        }
        PixelRect::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Smallest rectangle covering both; empty inputs are ignored.
    pub fn union_bounds(self, other: PixelRect) -> PixelRect {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        PixelRect::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Grow outward to multiples of `tile`, then clamp to `width x height`.
    pub fn snap_out(self, tile: u32, width: u32, height: u32) -> PixelRect {
        if self.is_empty() {
            return PixelRect::empty();
        }
        let tile = tile.max(1);
        let x0 = (self.x / tile) * tile;
        let y0 = (self.y / tile) * tile;
        let x1 = self.right().div_ceil(tile).saturating_mul(tile).min(width);
        let y1 = self.bottom().div_ceil(tile).saturating_mul(tile).min(height);
        if x1 <= x0 || y1 <= y0 {
            return PixelRect::empty();
        }
        PixelRect::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Row-major index of `(x, y)` in an image `stride` pixels wide.
    pub fn pixel_index(stride: u32, x: u32, y: u32) -> usize {
        (y as usize) * (stride as usize) + (x as usize)
    }
}

/// Axis-aligned bounding box in object space. Empty when `min > max` on any axis.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Aabb {
    /// Minimum corner.
    pub min: DVec3,
    /// Maximum corner.
    pub max: DVec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    /// Construct from corners.
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// The empty box (identity of [`Aabb::union`]).
    pub fn empty() -> Self {
        Self {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }

    /// `true` when the box contains no points.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Component-wise min/max union.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Box enclosing a sphere.
    pub fn around_sphere(center: DVec3, radius: f64) -> Aabb {
        Aabb {
            min: center - DVec3::splat(radius),
            max: center + DVec3::splat(radius),
        }
    }
}

/// Scene bounding sphere. A negative radius encodes "no geometry".
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundingSphere {
    /// Sphere center.
    pub center: DVec3,
    /// Sphere radius, `< 0` when empty.
    pub radius: f64,
}

impl Default for BoundingSphere {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingSphere {
    /// The empty sphere.
    pub fn empty() -> Self {
        Self {
            center: DVec3::ZERO,
            radius: -1.0,
        }
    }

    /// Sphere through the corners of `aabb`; empty box gives the empty sphere.
    pub fn from_aabb(aabb: &Aabb) -> Self {
        if aabb.is_empty() {
            return Self::empty();
        }
        Self {
            center: 0.5 * aabb.min + 0.5 * aabb.max,
            radius: (aabb.max - aabb.min).length() * 0.5,
        }
    }

    /// `true` when no geometry is enclosed.
    pub fn is_empty(&self) -> bool {
        self.radius < 0.0
    }
}

/// Byte length of an RGBA8 image, checked against overflow.
pub fn rgba_len(width: u32, height: u32) -> PipelineResult<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(4))
        .ok_or_else(|| PipelineError::validation("image size overflow"))
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
