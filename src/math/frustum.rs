//! Clip-space frustum for brick visibility tests

use crate::core::types::{Mat4, Vec3, Vec4};
use super::aabb::Aabb;

/// Plane `normal . p + distance = 0`, normal pointing into the frustum
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// From homogeneous coefficients, normalized; None when degenerate
    fn from_coefficients(c: Vec4) -> Option<Self> {
        let normal = c.truncate();
        let len = normal.length();
        (len > f32::EPSILON).then(|| Self::new(normal / len, c.w / len))
    }

    /// Signed distance (positive inside)
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.distance
    }

    /// Box corner furthest along the normal
    fn positive_vertex(&self, bbox: &Aabb) -> Vec3 {
        Vec3::select(self.normal.cmpge(Vec3::ZERO), bbox.max, bbox.min)
    }
}

/// Six clipping planes of a view-projection
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Gribb-Hartmann extraction from `projection * model_view`
    ///
    /// Degenerate planes are replaced by one that accepts everything.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let w = vp.row(3);
        let planes = std::array::from_fn(|i| {
            let axis = vp.row(i / 2);
            let c = if i % 2 == 0 { w + axis } else { w - axis };
            Plane::from_coefficients(c).unwrap_or(Plane::new(Vec3::ZERO, 1.0))
        });
        Self { planes }
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        self.planes.iter().all(|plane| plane.signed_distance(p) >= 0.0)
    }

    /// Conservative box test: false only if the box is fully outside a plane
    pub fn intersects_aabb(&self, bbox: &Aabb) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(plane.positive_vertex(bbox)) >= 0.0)
    }
}
