use crate::foundation::core::{Aabb, DVec3, PixelRect, Rank, Rgba8};
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::renderer::{LocalRenderer, RenderOutput};
use crate::sync::GlobalFrameState;
use crate::view::{Light, View};
use rayon::prelude::*;

/// Object-space sphere.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Sphere {
    /// Center.
    pub center: DVec3,
    /// Radius.
    pub radius: f64,
    /// Base color.
    pub color: Rgba8,
}

/// Ray-casts spheres with correct window-space depth.
///
/// Rays run from the near to the far plane through the inverse of `proj * view * model`, so depth
/// matches what a rasterizer with the same matrices would write. Lit by the view's enabled lights,
/// or by a headlight when there are none.
#[derive(Clone, Debug)]
pub struct SphereRenderer {
    spheres: Vec<Sphere>,
    rank_color: Option<Rgba8>,
    num_timesteps: u32,
    drift: DVec3,
}

/// Color of `rank` in a 3x3x3 palette.
pub fn rank_color(rank: Rank) -> Rgba8 {
    let level = |i: usize| ((i % 3 + 1) * 255 / 3) as u8;
    [level(rank), level(rank / 3), level(rank / 9), 255]
}

impl SphereRenderer {
    /// Renderer for `spheres` with a single timestep.
    pub fn new(spheres: Vec<Sphere>) -> Self {
        Self {
            spheres,
            rank_color: None,
            num_timesteps: 1,
            drift: DVec3::ZERO,
        }
    }

    /// Paint every sphere in the palette color of `rank` instead of its own color.
    pub fn color_rank(mut self, rank: Rank) -> Self {
        self.rank_color = Some(rank_color(rank));
        self
    }

    /// Expose `n` timesteps; timestep `t` shifts every sphere by `drift * t`.
    pub fn with_timesteps(mut self, n: u32, drift: DVec3) -> Self {
        self.num_timesteps = n.max(1);
        self.drift = drift;
        self
    }

    /// Spheres as placed at `timestep`.
    pub fn spheres_at(&self, timestep: u32) -> Vec<Sphere> {
        let offset = self.drift * f64::from(timestep.min(self.num_timesteps - 1));
        self.spheres
            .iter()
            .map(|s| Sphere {
                center: s.center + offset,
                radius: s.radius,
                color: self.rank_color.unwrap_or(s.color),
            })
            .collect()
    }
}

fn hit(s: &Sphere, origin: DVec3, dir: DVec3) -> Option<f64> {
    let oc = origin - s.center;
    let a = dir.dot(dir);
    let b = 2.0 * oc.dot(dir);
    let c = oc.dot(oc) - s.radius * s.radius;
    let disc = b * b - 4.0 * a * c;
    if a <= 0.0 || disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    [(-b - sq) / (2.0 * a), (-b + sq) / (2.0 * a)]
        .into_iter()
        .find(|t| (0.0..=1.0).contains(t))
}

fn shade(base: Rgba8, p: DVec3, n: DVec3, eye: DVec3, lights: &[Light]) -> Rgba8 {
    let rgb = DVec3::new(base[0] as f64, base[1] as f64, base[2] as f64) / 255.0;
    let mut lit = DVec3::ZERO;
    let mut any = false;
    for l in lights.iter().filter(|l| l.enabled) {
        any = true;
        let to_light = if l.is_directional {
            l.transformed_position.truncate()
        } else {
            l.transformed_position.truncate() - p
        }
        .normalize_or_zero();
        let diffuse = n.dot(to_light).max(0.0);
        lit += rgb * (l.ambient.truncate() + l.diffuse.truncate() * diffuse);
    }
    if !any {
        let lambert = n.dot((eye - p).normalize_or_zero()).max(0.0);
        lit = rgb * (0.2 + 0.8 * lambert);
    }
    let q = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    [q(lit.x), q(lit.y), q(lit.z), base[3]]
}

impl LocalRenderer for SphereRenderer {
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
        let mvp = view.model_view_proj();
        if mvp.determinant().abs() < 1e-12 {
            return Err(PipelineError::validation(format!(
                "view {} has a singular projection",
                view.id.0
            )));
        }
        let inv = mvp.inverse();
        let eye = view.model_view().inverse().transform_point3(DVec3::ZERO);
        let spheres = self.spheres_at(frame.timestep);

        let mut out = RenderOutput::cleared(view.width, view.height, viewport)?;
        let (w, h) = (view.width as usize, view.height as usize);
        if w == 0 || viewport.is_empty() {
            return Ok(out);
        }
        out.color
            .par_chunks_mut(w * 4)
            .zip(out.depth.par_chunks_mut(w))
            .enumerate()
            .for_each(|(y, (color, depth))| {
                let y = y as u32;
                if y < viewport.y || y >= viewport.bottom() {
                    return;
                }
                let ny = 1.0 - (y as f64 + 0.5) / h as f64 * 2.0;
                for x in viewport.x..viewport.right() {
                    let nx = (x as f64 + 0.5) / w as f64 * 2.0 - 1.0;
                    let near = inv.project_point3(DVec3::new(nx, ny, -1.0));
                    let far = inv.project_point3(DVec3::new(nx, ny, 1.0));
                    let dir = far - near;

                    let mut best: Option<(f64, &Sphere)> = None;
                    for s in &spheres {
                        if let Some(t) = hit(s, near, dir)
                            && best.is_none_or(|(bt, _)| t < bt)
                        {
                            best = Some((t, s));
                        }
                    }
                    let Some((t, s)) = best else {
                        continue;
                    };
                    let p = near + dir * t;
                    let clip = mvp * p.extend(1.0);
                    let z = (clip.z / clip.w * 0.5 + 0.5).clamp(0.0, 1.0) as f32;
                    let n = ((p - s.center) / s.radius).normalize_or_zero();
                    let i = x as usize;
                    color[i * 4..i * 4 + 4].copy_from_slice(&shade(s.color, p, n, eye, &view.lights));
                    depth[i] = z;
                }
            });
        Ok(out)
    }

    fn local_bounds(&self) -> Aabb {
        let first = self.spheres_at(0);
        let last = self.spheres_at(self.num_timesteps - 1);
        first
            .iter()
            .chain(&last)
            .fold(Aabb::empty(), |acc, s| {
                acc.union(&Aabb::around_sphere(s.center, s.radius))
            })
    }

    fn num_timesteps(&self) -> u32 {
        self.num_timesteps
    }
}
