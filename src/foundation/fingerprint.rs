use crate::foundation::core::{BoundingSphere, DMat4, DVec3, DVec4};
use crate::view::{Light, View};
use xxhash_rust::xxh3::Xxh3;

const XXH3_SEED: u64 = 0x51f1_ce7a_0b3d_92c4;

/// Stable fingerprint of everything that influences the pixels of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct FrameFingerprint {
    pub(crate) hi: u64,
    pub(crate) lo: u64,
}

/// Fingerprint the agreed inputs of a frame.
///
/// The sequence number is not hashed, so two frames with identical cameras, lights, bounds and
/// timestep compare equal.
pub(crate) fn fingerprint_frame(
    views: &[View],
    timestep: u32,
    num_timesteps: u32,
    bounds: &BoundingSphere,
) -> FrameFingerprint {
    let mut h = StableHasher::new();
    h.write_u32(timestep);
    h.write_u32(num_timesteps);
    h.write_dvec3(bounds.center);
    h.write_f64(bounds.radius);
    h.write_u64(views.len() as u64);
    for v in views {
        write_view(&mut h, v);
    }
    h.finish()
}

fn write_view(h: &mut StableHasher, v: &View) {
    h.write_u32(v.id.0);
    h.write_u32(v.width);
    h.write_u32(v.height);
    h.write_dmat4(&v.model);
    h.write_dmat4(&v.view);
    h.write_dmat4(&v.proj);
    h.write_u64(v.lights.len() as u64);
    for l in &v.lights {
        write_light(h, l);
    }
}

fn write_light(h: &mut StableHasher, l: &Light) {
    h.write_bool(l.enabled);
    h.write_dvec4(l.position);
    h.write_dvec4(l.ambient);
    h.write_dvec4(l.diffuse);
    h.write_dvec4(l.specular);
    h.write_dvec3(l.attenuation);
    h.write_dvec3(l.spot_direction);
    h.write_f64(l.spot_cutoff);
    h.write_f64(l.spot_exponent);
}

struct StableHasher {
    inner: Xxh3,
}

impl StableHasher {
    fn new() -> Self {
        Self {
            inner: Xxh3::with_seed(XXH3_SEED),
        }
    }

    fn write_bytes(&mut self, b: &[u8]) {
        self.inner.update(b);
    }

    fn write_bool(&mut self, v: bool) {
        self.write_bytes(&[u8::from(v)]);
    }

    fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    fn write_dvec3(&mut self, v: DVec3) {
        for c in v.to_array() {
            self.write_f64(c);
        }
    }

    fn write_dvec4(&mut self, v: DVec4) {
        for c in v.to_array() {
            self.write_f64(c);
        }
    }

    fn write_dmat4(&mut self, m: &DMat4) {
        for c in m.to_cols_array() {
            self.write_f64(c);
        }
    }

    fn finish(self) -> FrameFingerprint {
        let v = self.inner.digest128();
        FrameFingerprint {
            hi: (v >> 64) as u64,
            lo: v as u64,
        }
    }
}
