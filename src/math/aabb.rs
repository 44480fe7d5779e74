//! Axis-aligned bounding box

use crate::core::types::Vec3;

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create AABB from center and half-extents
    pub fn from_center_half_extent(center: Vec3, half_extent: Vec3) -> Self {
        Self {
            min: center - half_extent,
            max: center + half_extent,
        }
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if point is inside AABB
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y &&
        p.z >= self.min.z && p.z <= self.max.z
    }

    /// Check if two AABBs intersect
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Return merged AABB containing both
    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// The eight corners; bit 0 selects x, bit 1 y, bit 2 z (set = max)
    pub fn corners(&self) -> [Vec3; 8] {
        std::array::from_fn(|i| Vec3::new(
            if i & 1 != 0 { self.max.x } else { self.min.x },
            if i & 2 != 0 { self.max.y } else { self.min.y },
            if i & 4 != 0 { self.max.z } else { self.min.z },
        ))
    }

    /// Shrink towards the center by `fraction` of the diagonal on each side
    pub fn inset(&self, fraction: f32) -> Aabb {
        let d = self.size() * fraction;
        Aabb::new(self.min + d, self.max - d)
    }

    /// Euclidean distance from a point to the box (0 inside)
    pub fn distance_to_point(&self, p: Vec3) -> f32 {
        let gap = (self.min - p).max(p - self.max).max(Vec3::ZERO);
        gap.length()
    }

    /// Euclidean gap between two boxes (0 when they touch or overlap)
    pub fn distance_to(&self, other: &Aabb) -> f32 {
        let gap = (self.min - other.max).max(other.min - self.max).max(Vec3::ZERO);
        gap.length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_accessors() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(aabb.center(), Vec3::splat(0.5));
        assert_eq!(aabb.size(), Vec3::ONE);
    }

    #[test]
    fn test_contains_point() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert!(aabb.contains_point(Vec3::splat(0.5)));
        assert!(!aabb.contains_point(Vec3::splat(2.0)));
    }

    #[test]
    fn test_intersects() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(0.5), Vec3::splat(1.5));
        let c = Aabb::new(Vec3::splat(2.0), Vec3::splat(3.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_corners() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let corners = aabb.corners();
        assert_eq!(corners[0], Vec3::ZERO);
        assert_eq!(corners[1], Vec3::X);
        assert_eq!(corners[6], Vec3::new(0.0, 1.0, 1.0));
        assert_eq!(corners[7], Vec3::ONE);
    }

    #[test]
    fn test_box_distance() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let touching = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let apart = Aabb::new(Vec3::new(4.0, 5.0, 0.0), Vec3::new(5.0, 6.0, 1.0));

        assert_eq!(a.distance_to(&a), 0.0);
        assert_eq!(a.distance_to(&touching), 0.0);
        // gap of (3, 4, 0)
        assert!((a.distance_to(&apart) - 5.0).abs() < 1e-6);
        assert_eq!(a.distance_to(&apart), apart.distance_to(&a));
    }

    #[test]
    fn test_point_distance() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(a.distance_to_point(Vec3::splat(0.5)), 0.0);
        assert!((a.distance_to_point(Vec3::new(3.0, 0.5, 0.5)) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_inset() {
        let a = Aabb::new(Vec3::ZERO, Vec3::splat(1000.0));
        let inset = a.inset(0.001);
        assert!(inset.min.abs_diff_eq(Vec3::ONE, 1e-4));
        assert!(inset.max.abs_diff_eq(Vec3::splat(999.0), 1e-3));
    }
}
