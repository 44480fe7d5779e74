//! Ray type and operations

use crate::core::types::{Vec3, Mat4};

/// A ray defined by origin and direction
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Create a new ray (direction should be normalized)
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Object-space view ray of a model-view matrix
    ///
    /// The origin is the eye point and the direction the viewing direction
    /// (camera -Z), both expressed in the object space the matrix maps from.
    pub fn from_model_view(model_view: &Mat4) -> Self {
        let inv = model_view.inverse();
        let origin = inv.transform_point3(Vec3::ZERO);
        let direction = inv.transform_vector3(Vec3::NEG_Z).normalize_or_zero();
        Self { origin, direction }
    }

    /// Get point along ray at parameter t
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Transform ray by matrix
    pub fn transform(&self, matrix: &Mat4) -> Ray {
        let new_origin = matrix.transform_point3(self.origin);
        let new_direction = matrix.transform_vector3(self.direction).normalize();
        Ray::new(new_origin, new_direction)
    }
}
