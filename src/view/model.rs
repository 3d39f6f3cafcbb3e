use crate::foundation::core::{DMat4, DVec3, DVec4, PixelRect, ViewId};

/// Threshold below which a transformed homogeneous `w` marks a light as directional.
const DIRECTIONAL_EPSILON: f64 = 1e-7;

/// Fixed-function style light source.
///
/// `position` is homogeneous: `w == 0` encodes a directional light. The `transformed_*` fields are
/// derived once per frame by [`Light::transform`] and are not part of the agreed state.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Light {
    /// Light enabled flag.
    pub enabled: bool,
    /// Homogeneous position in world space.
    pub position: DVec4,
    /// Ambient color.
    pub ambient: DVec4,
    /// Diffuse color.
    pub diffuse: DVec4,
    /// Specular color.
    pub specular: DVec4,
    /// Constant, linear and quadratic attenuation.
    pub attenuation: DVec3,
    /// Spot direction.
    pub spot_direction: DVec3,
    /// Spot cutoff angle in degrees (180 disables the cone).
    pub spot_cutoff: f64,
    /// Spot exponent.
    pub spot_exponent: f64,

    /// Position in the renderer's reference frame (`w` normalized to 1 for point lights).
    #[serde(skip)]
    pub transformed_position: DVec4,
    /// Spot direction in the renderer's reference frame.
    #[serde(skip)]
    pub transformed_direction: DVec3,
    /// Whether the transformed position encodes a direction.
    #[serde(skip)]
    pub is_directional: bool,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            enabled: true,
            position: DVec4::new(0.0, 0.0, 1.0, 0.0),
            ambient: DVec4::new(0.0, 0.0, 0.0, 1.0),
            diffuse: DVec4::ONE,
            specular: DVec4::ONE,
            attenuation: DVec3::new(1.0, 0.0, 0.0),
            spot_direction: DVec3::new(0.0, 0.0, -1.0),
            spot_cutoff: 180.0,
            spot_exponent: 0.0,
            transformed_position: DVec4::new(0.0, 0.0, 1.0, 0.0),
            transformed_direction: DVec3::new(0.0, 0.0, -1.0),
            is_directional: true,
        }
    }
}

impl Light {
    /// Recompute the derived fields using `to_reference` (usually the inverse model matrix).
    pub fn transform(&mut self, to_reference: &DMat4) {
        let p = *to_reference * self.position;
        if p.w.abs() > DIRECTIONAL_EPSILON {
            self.is_directional = false;
            self.transformed_position = p / p.w;
        } else {
            self.is_directional = true;
            self.transformed_position = p;
        }
        self.transformed_direction = to_reference
            .transform_vector3(self.spot_direction)
            .normalize_or_zero();
    }
}

/// Camera parameters for one view as supplied by the display side.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ViewParams {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Model matrix.
    pub model: DMat4,
    /// View matrix.
    pub view: DMat4,
    /// Projection matrix.
    pub proj: DMat4,
    /// Lights in evaluation order.
    pub lights: Vec<Light>,
}

impl Default for ViewParams {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            model: DMat4::IDENTITY,
            view: DMat4::IDENTITY,
            proj: DMat4::IDENTITY,
            lights: Vec::new(),
        }
    }
}

/// One logical camera requiring its own composited image.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct View {
    /// View identifier (equal to its registry index).
    pub id: ViewId,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Model matrix.
    pub model: DMat4,
    /// View matrix.
    pub view: DMat4,
    /// Projection matrix.
    pub proj: DMat4,
    /// Lights in evaluation order.
    pub lights: Vec<Light>,
}

impl View {
    /// A `width x height` view with identity matrices and no lights.
    pub fn new(id: ViewId, width: u32, height: u32) -> Self {
        Self {
            id,
            width,
            height,
            model: DMat4::IDENTITY,
            view: DMat4::IDENTITY,
            proj: DMat4::IDENTITY,
            lights: Vec::new(),
        }
    }

    /// Build from display-side parameters.
    pub fn from_params(id: ViewId, params: ViewParams) -> Self {
        Self {
            id,
            width: params.width,
            height: params.height,
            model: params.model,
            view: params.view,
            proj: params.proj,
            lights: params.lights,
        }
    }

    /// The view's full pixel rectangle.
    pub fn full_rect(&self) -> PixelRect {
        PixelRect::full(self.width, self.height)
    }

    /// `view * model`.
    pub fn model_view(&self) -> DMat4 {
        self.view * self.model
    }

    /// `proj * view * model`.
    pub fn model_view_proj(&self) -> DMat4 {
        self.proj * self.model_view()
    }

    /// `true` when width or height differ from `other`.
    pub fn dims_differ(&self, other: &View) -> bool {
        self.width != other.width || self.height != other.height
    }

    /// Bring all lights into the model's reference frame.
    ///
    /// A singular model matrix leaves the lights in world space.
    pub fn transform_lights(&mut self) {
        let to_reference = if self.model.determinant().abs() > f64::EPSILON {
            self.model.inverse()
        } else {
            DMat4::IDENTITY
        };
        for light in &mut self.lights {
            light.transform(&to_reference);
        }
    }
}
