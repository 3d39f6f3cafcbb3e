use crate::foundation::core::{BoundingSphere, DVec3, DVec4, PixelRect};
use crate::view::View;

/// Clip-space `w` at or below which a corner counts as behind the eye.
const NEAR_W: f64 = 1e-6;

/// Tolerance for window coordinates that land on a pixel edge.
const EDGE_EPS: f64 = 1e-6;

/// Screen-space rectangle that can contain pixels of geometry inside `bounds`.
///
/// Projects the eight corners of the cube enclosing the sphere through `proj * view * model`,
/// takes the bounding box in top-left window coordinates, snaps it outward to `tile_size` and
/// clamps it to the view. An empty sphere gives an empty rectangle; a corner behind the eye gives
/// the full view.
pub fn valid_rect(view: &View, bounds: &BoundingSphere, tile_size: u32) -> PixelRect {
    if bounds.is_empty() || view.width == 0 || view.height == 0 {
        return PixelRect::empty();
    }
    let full = view.full_rect();
    let mvp = view.model_view_proj();
    let r = bounds.radius;

    let (w, h) = (view.width as f64, view.height as f64);
    let mut lo = (f64::INFINITY, f64::INFINITY);
    let mut hi = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for i in 0..8 {
        let sign = DVec3::new(
            if i & 1 == 0 { -1.0 } else { 1.0 },
            if i & 2 == 0 { -1.0 } else { 1.0 },
            if i & 4 == 0 { -1.0 } else { 1.0 },
        );
        let corner = bounds.center + sign * r;
        let clip = mvp * DVec4::new(corner.x, corner.y, corner.z, 1.0);
        if clip.w <= NEAR_W {
            return full;
        }
        let nx = clip.x / clip.w;
        let ny = clip.y / clip.w;
        let wx = (nx * 0.5 + 0.5) * w;
        let wy = (1.0 - (ny * 0.5 + 0.5)) * h;
        lo = (lo.0.min(wx), lo.1.min(wy));
        hi = (hi.0.max(wx), hi.1.max(wy));
    }

    let x0 = (lo.0 + EDGE_EPS).floor().clamp(0.0, w);
    let y0 = (lo.1 + EDGE_EPS).floor().clamp(0.0, h);
    let x1 = (hi.0 - EDGE_EPS).ceil().clamp(0.0, w);
    let y1 = (hi.1 - EDGE_EPS).ceil().clamp(0.0, h);
    if x1 <= x0 || y1 <= y0 {
        return PixelRect::empty();
    }
    PixelRect::new(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32).snap_out(
        tile_size,
        view.width,
        view.height,
    )
}
