use crate::composite::contribution::Contribution;
use crate::foundation::core::{MAX_DEPTH, PixelRect, Rgba8};
use crate::foundation::error::{PipelineError, PipelineResult};
use rayon::prelude::*;
use std::cmp::Ordering;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Owner stamp of pixels no rank covers.
pub const UNCOVERED: u32 = u32::MAX;

/// Partial composite over a rectangle of the view.
///
/// Each pixel carries color, depth and the rank that produced it. Uncovered pixels hold depth
/// `+inf` and owner [`UNCOVERED`], so they lose against every covered sample. A rank's pixel at
/// [`MAX_DEPTH`] or farther is cleared background and counts as uncovered.
#[derive(Clone, Debug, PartialEq)]
pub struct Fragment {
    /// Covered rectangle in view coordinates.
    pub rect: PixelRect,
    /// RGBA8, `rect.area() * 4` bytes.
    pub color: Vec<u8>,
    /// Depth, `rect.area()` values.
    pub depth: Vec<f32>,
    /// Producing rank per pixel.
    pub owner: Vec<u32>,
}

/// `true` when sample `a` is in front of sample `b`: smaller depth, then lower rank.
#[inline]
pub fn in_front(depth_a: f32, owner_a: u32, depth_b: f32, owner_b: u32) -> bool {
    match depth_a.total_cmp(&depth_b) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => owner_a < owner_b,
    }
}

/// `true` for depths at or behind the far plane.
#[inline]
fn is_far(depth: f32) -> bool {
    depth >= MAX_DEPTH
}

impl Fragment {
    /// Fragment over `rect` with every pixel uncovered.
    pub fn uncovered(rect: PixelRect) -> Self {
        let n = rect.area();
        Self {
            rect,
            color: vec![0; n * 4],
            depth: vec![f32::INFINITY; n],
            owner: vec![UNCOVERED; n],
        }
    }

    /// Pixels of `c` inside `c.valid ∩ clip`. Far pixels come out uncovered.
    pub fn from_contribution(c: &Contribution, clip: PixelRect) -> Self {
        let rect = c.valid.intersect(clip);
        let owner = u32::try_from(c.rank).unwrap_or(UNCOVERED - 1);
        let n = rect.area();
        let mut out = Self {
            rect,
            color: Vec::with_capacity(n * 4),
            depth: Vec::with_capacity(n),
            owner: Vec::with_capacity(n),
        };
        let w = rect.width as usize;
        for y in rect.y..rect.bottom() {
            let i = PixelRect::pixel_index(c.width, rect.x, y);
            for (px, &d) in c.color[i * 4..(i + w) * 4]
                .chunks_exact(4)
                .zip(&c.depth[i..i + w])
            {
                if is_far(d) {
                    out.color.extend_from_slice(&[0; 4]);
                    out.depth.push(f32::INFINITY);
                    out.owner.push(UNCOVERED);
                } else {
                    out.color.extend_from_slice(px);
                    out.depth.push(d);
                    out.owner.push(owner);
                }
            }
        }
        out
    }

    /// Pixels of `self` inside `clip`.
    pub fn clip(&self, clip: PixelRect) -> Self {
        let rect = self.rect.intersect(clip);
        let mut out = Self::uncovered(rect);
        out.merge_from(self);
        out
    }

    /// `true` when no pixel is covered.
    pub fn is_empty(&self) -> bool {
        self.owner.iter().all(|&o| o == UNCOVERED)
    }

    /// Sample at view coordinates `(x, y)`, `None` when outside or uncovered.
    pub fn sample(&self, x: u32, y: u32) -> Option<(Rgba8, f32, u32)> {
        if !self.rect.contains(x, y) {
            return None;
        }
        let i = PixelRect::pixel_index(self.rect.width, x - self.rect.x, y - self.rect.y);
        if self.owner[i] == UNCOVERED {
            return None;
        }
        let c = &self.color[i * 4..i * 4 + 4];
        Some(([c[0], c[1], c[2], c[3]], self.depth[i], self.owner[i]))
    }

    /// Keep, per pixel of `self.rect ∩ src.rect`, whichever sample is in front.
    pub fn merge_from(&mut self, src: &Fragment) {
        let overlap = self.rect.intersect(src.rect);
        if overlap.is_empty() {
            return;
        }
        let dst_rect = self.rect;
        let dw = dst_rect.width as usize;
        let sw = src.rect.width as usize;
        let ow = overlap.width as usize;
        let dx0 = (overlap.x - dst_rect.x) as usize;
        let sx0 = (overlap.x - src.rect.x) as usize;

        self.color
            .par_chunks_mut(dw * 4)
            .zip(self.depth.par_chunks_mut(dw))
            .zip(self.owner.par_chunks_mut(dw))
            .enumerate()
            .for_each(|(row, ((color, depth), owner))| {
                let y = dst_rect.y + row as u32;
                if y < overlap.y || y >= overlap.bottom() {
                    return;
                }
                let s_row = (y - src.rect.y) as usize * sw;
                for k in 0..ow {
                    let d = dx0 + k;
                    let s = s_row + sx0 + k;
                    if src.owner[s] == UNCOVERED || is_far(src.depth[s]) {
                        continue;
                    }
                    if in_front(src.depth[s], src.owner[s], depth[d], owner[d]) {
                        depth[d] = src.depth[s];
                        owner[d] = src.owner[s];
                        color[d * 4..d * 4 + 4].copy_from_slice(&src.color[s * 4..s * 4 + 4]);
                    }
                }
            });
    }

    /// Final pixels of `tile`: covered samples as they are, everything else `background` at
    /// [`MAX_DEPTH`].
    pub fn resolve(&self, tile: PixelRect, background: Rgba8) -> (Vec<u8>, Vec<f32>) {
        let tw = tile.width as usize;
        let mut color = vec![0u8; tile.area() * 4];
        let mut depth = vec![MAX_DEPTH; tile.area()];
        if tw == 0 {
            return (color, depth);
        }
        color
            .par_chunks_mut(tw * 4)
            .zip(depth.par_chunks_mut(tw))
            .enumerate()
            .for_each(|(row, (color, depth))| {
                let y = tile.y + row as u32;
                for k in 0..tw {
                    let x = tile.x + k as u32;
                    match self.sample(x, y).filter(|&(_, d, _)| !is_far(d)) {
                        Some((c, d, _)) => {
                            color[k * 4..k * 4 + 4].copy_from_slice(&c);
                            depth[k] = d;
                        }
                        None => color[k * 4..k * 4 + 4].copy_from_slice(&background),
                    }
                }
            });
        (color, depth)
    }
}

/// Merge two fragments over the union of their rectangles.
///
/// The per-pixel key `(depth, rank)` is a total order, so the merge is associative and
/// commutative.
pub fn merge_fragments(a: &Fragment, b: &Fragment) -> Fragment {
    let mut out = Fragment::uncovered(a.rect.union_bounds(b.rect));
    out.merge_from(a);
    out.merge_from(b);
    out
}

/// Shape of the reduction tree used by [`reduce`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReductionOrder {
    /// `((f0 + f1) + f2) + ...`
    Linear,
    /// Pairwise rounds, like a binary tree over ranks.
    Balanced,
    /// Balanced tree over a seed-dependent permutation.
    Permuted(u64),
}

fn reduce_balanced(mut level: Vec<Fragment>) -> Option<Fragment> {
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut it = level.into_iter();
        while let Some(a) = it.next() {
            match it.next() {
                Some(b) => next.push(merge_fragments(&a, &b)),
                None => next.push(a),
            }
        }
        level = next;
    }
    level.pop()
}

/// Reduce any number of fragments to one.
pub fn reduce(fragments: Vec<Fragment>, order: ReductionOrder) -> Fragment {
    let out = match order {
        ReductionOrder::Linear => fragments.into_iter().reduce(|a, b| merge_fragments(&a, &b)),
        ReductionOrder::Balanced => reduce_balanced(fragments),
        ReductionOrder::Permuted(seed) => {
            let mut keyed: Vec<(u64, Fragment)> = fragments
                .into_iter()
                .enumerate()
                .map(|(i, f)| (xxh3_64_with_seed(&(i as u64).to_le_bytes(), seed), f))
                .collect();
            keyed.sort_by_key(|(k, _)| *k);
            reduce_balanced(keyed.into_iter().map(|(_, f)| f).collect())
        }
    };
    out.unwrap_or_else(|| Fragment::uncovered(PixelRect::empty()))
}

const HEADER_WORDS: usize = 5;

/// Serialize a fragment plus a "frame dropped" flag.
///
/// Layout: five native-endian `u32` (x, y, width, height, dropped), then color, depth and owner
/// arrays.
pub fn encode_fragment(fragment: &Fragment, dropped: bool) -> Vec<u8> {
    let r = fragment.rect;
    let header: [u32; HEADER_WORDS] = [r.x, r.y, r.width, r.height, u32::from(dropped)];
    let mut out = Vec::with_capacity(
        HEADER_WORDS * 4 + fragment.color.len() + (fragment.depth.len() + fragment.owner.len()) * 4,
    );
    out.extend_from_slice(bytemuck::cast_slice(&header));
    out.extend_from_slice(&fragment.color);
    out.extend_from_slice(bytemuck::cast_slice(&fragment.depth));
    out.extend_from_slice(bytemuck::cast_slice(&fragment.owner));
    out
}

/// Inverse of [`encode_fragment`].
pub fn decode_fragment(bytes: &[u8]) -> PipelineResult<(Fragment, bool)> {
    let Some(head) = bytes.get(..HEADER_WORDS * 4) else {
        return Err(PipelineError::serde("fragment packet shorter than its header"));
    };
    let header: Vec<u32> = bytemuck::pod_collect_to_vec(head);
    let rect = PixelRect::new(header[0], header[1], header[2], header[3]);
    let dropped = header[4] != 0;

    let n = rect.area();
    let body = &bytes[HEADER_WORDS * 4..];
    if body.len() != n * 12 {
        return Err(PipelineError::serde(format!(
            "fragment packet for {rect:?} carries {} bytes, expected {}",
            body.len(),
            n * 12
        )));
    }
    let (color, rest) = body.split_at(n * 4);
    let (depth, owner) = rest.split_at(n * 4);
    Ok((
        Fragment {
            rect,
            color: color.to_vec(),
            depth: bytemuck::pod_collect_to_vec(depth),
            owner: bytemuck::pod_collect_to_vec(owner),
        },
        dropped,
    ))
}

#[cfg(test)]
#[path = "../../tests/unit/composite/merge.rs"]
mod tests;
