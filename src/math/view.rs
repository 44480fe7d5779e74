//! Camera state used to order and cull bricks

use crate::core::types::{Mat4, Vec3};
use super::{Aabb, Frustum, Ray};

/// Matrices of the current view, in the object space of the volume
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewState {
    /// Object-to-eye transform
    pub model_view: Mat4,
    /// Eye-to-clip transform
    pub projection: Mat4,
    /// Orthographic projection (sort by view plane instead of eye point)
    pub orthographic: bool,
}

impl ViewState {
    pub fn new(model_view: Mat4, projection: Mat4, orthographic: bool) -> Self {
        Self { model_view, projection, orthographic }
    }

    /// Perspective view of `target` from `eye`
    pub fn perspective(eye: Vec3, target: Vec3, fov_y_radians: f32) -> Self {
        Self {
            model_view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection: Mat4::perspective_rh(fov_y_radians, 1.0, 0.01, 100.0),
            orthographic: false,
        }
    }

    /// Orthographic view of `target` from `eye`, `half_extent` wide
    pub fn orthographic(eye: Vec3, target: Vec3, half_extent: f32) -> Self {
        Self {
            model_view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection: Mat4::orthographic_rh(
                -half_extent, half_extent, -half_extent, half_extent, 0.01, 100.0,
            ),
            orthographic: true,
        }
    }

    /// Object-space view ray
    pub fn ray(&self) -> Ray {
        Ray::from_model_view(&self.model_view)
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&(self.projection * self.model_view))
    }

    /// Whether a brick box can contribute to the image
    pub fn sees(&self, frustum: &Frustum, bbox: &Aabb) -> bool {
        if !self.orthographic && bbox.contains_point(self.ray().origin) {
            return true;
        }
        frustum.intersects_aabb(bbox)
    }

    /// Same view within `epsilon` per matrix element
    pub fn approx_eq(&self, other: &ViewState, epsilon: f32) -> bool {
        self.orthographic == other.orthographic
            && self.model_view.abs_diff_eq(other.model_view, epsilon)
            && self.projection.abs_diff_eq(other.projection, epsilon)
    }
}
