//! Brick visiting order
//!
//! Bricks are ordered either along the view (front-to-back or back-to-front
//! for correct blending) or by distance from a quota center, the point the
//! user is currently interacting with. Orders are cached on the catalog and
//! only recomputed while its `needs_resort` flag is set.

use std::cmp::Ordering;

use crate::core::config::UpdateOrder;
use crate::core::types::Vec3;
use crate::math::{Aabb, Ray, ViewState};
use crate::volume::{Brick, BrickCatalog, BrickId};

/// Corner inset (fraction of the box size) so shared faces don't tie
const CORNER_INSET: f32 = 0.001;

/// Distance of a brick box from the viewer
///
/// Minimum over the (slightly inset) box corners of the distance to the eye
/// point, or for orthographic views of the projection onto the view
/// direction.
pub fn visibility_distance(bbox: &Aabb, ray: &Ray, orthographic: bool) -> f32 {
    bbox.inset(CORNER_INSET)
        .corners()
        .into_iter()
        .map(|c| {
            if orthographic {
                c.dot(ray.direction)
            } else {
                c.distance(ray.origin)
            }
        })
        .fold(f32::INFINITY, f32::min)
}

/// Compare two bricks by their sort distance, breaking ties by index
fn compare(a: &Brick, b: &Brick, order: UpdateOrder) -> Ordering {
    let by_distance = match order {
        UpdateOrder::FrontToBack => a.distance.total_cmp(&b.distance),
        UpdateOrder::BackToFront => b.distance.total_cmp(&a.distance),
    };
    by_distance.then_with(|| a.id.cmp(&b.id))
}

/// Write the view distance of `ids` into their bricks and sort `ids` by it
///
/// Ids with no brick in `bricks` sort last.
pub(crate) fn rank_by_view(
    bricks: &mut [Brick],
    ids: &mut [BrickId],
    ray: &Ray,
    orthographic: bool,
    order: UpdateOrder,
) {
    for id in ids.iter() {
        if let Some(brick) = bricks.get_mut(id.index()) {
            brick.distance = visibility_distance(&brick.bbox, ray, orthographic);
        }
    }
    ids.sort_by(|a, b| match (bricks.get(a.index()), bricks.get(b.index())) {
        (Some(x), Some(y)) => compare(x, y, order),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    });
}

/// All brick ids ordered nearest-center-first from `center`
///
/// Writes the center distance into each brick.
pub(crate) fn rank_by_center(bricks: &mut [Brick], center: Vec3) -> Vec<BrickId> {
    for brick in bricks.iter_mut() {
        brick.distance = brick.bbox.center().distance(center);
    }
    let mut ids: Vec<BrickId> = bricks.iter().map(|b| b.id).collect();
    ids.sort_by(|a, b| compare(&bricks[a.index()], &bricks[b.index()], UpdateOrder::FrontToBack));
    ids
}

/// Produces and caches brick visiting orders
#[derive(Clone, Copy, Debug, Default)]
pub struct ViewSorter {
    order: UpdateOrder,
}

impl ViewSorter {
    pub fn new(order: UpdateOrder) -> Self {
        Self { order }
    }

    pub fn order(&self) -> UpdateOrder {
        self.order
    }

    pub fn set_order(&mut self, order: UpdateOrder) {
        self.order = order;
    }

    /// Every brick of `catalog` in view order
    ///
    /// Recomputed only when the catalog needs a resort; otherwise the cached
    /// order is returned.
    pub fn sorted_by_view<'a>(
        &self,
        catalog: &'a mut BrickCatalog,
        view: &ViewState,
    ) -> &'a [BrickId] {
        if catalog.needs_resort() || catalog.sorted.len() != catalog.len() {
            let mut ids: Vec<BrickId> = catalog.bricks().iter().map(|b| b.id).collect();
            let ray = view.ray();
            rank_by_view(catalog.bricks_mut(), &mut ids, &ray, view.orthographic, self.order);
            catalog.sorted = ids;
            catalog.clear_needs_resort();
            log::trace!("Sorted {} bricks of {:?} by view", catalog.len(), catalog.volume());
        }
        &catalog.sorted
    }

    /// Up to `quota` bricks nearest to `center`, then in view order
    ///
    /// With `skip_pending`, bricks with a non-zero priority are not selected.
    pub fn sorted_by_quota<'a>(
        &self,
        catalog: &'a mut BrickCatalog,
        center: Vec3,
        quota: usize,
        skip_pending: bool,
        view: &ViewState,
    ) -> &'a [BrickId] {
        if catalog.needs_resort() {
            let nearest = rank_by_center(catalog.bricks_mut(), center);
            let mut selected: Vec<BrickId> = nearest.into_iter()
                .filter(|id| !skip_pending || catalog.bricks()[id.index()].is_drawable())
                .take(quota)
                .collect();
            let ray = view.ray();
            rank_by_view(catalog.bricks_mut(), &mut selected, &ray, view.orthographic, self.order);
            catalog.quota = selected;
            catalog.clear_needs_resort();
            log::trace!(
                "Selected {} of {} bricks of {:?} around {}",
                catalog.quota.len(), catalog.len(), catalog.volume(), center
            );
        }
        &catalog.quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::UVec3;
    use crate::volume::{ComponentFormat, VolumeId};

    /// 4 bricks along x
    fn row() -> BrickCatalog {
        BrickCatalog::partition(
            VolumeId(0),
            UVec3::new(13, 4, 4),
            UVec3::new(4, 4, 4),
            Vec3::ONE,
            vec![ComponentFormat::data_u8()],
        ).unwrap()
    }

    fn view_from_pos_x() -> ViewState {
        ViewState::perspective(Vec3::new(5.0, 0.5, 0.5), Vec3::new(0.0, 0.5, 0.5), 1.0)
    }

    #[test]
    fn test_visibility_distance() {
        let bbox = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let ray = Ray::new(Vec3::new(3.0, 0.5, 0.5), Vec3::NEG_X);
        let d = visibility_distance(&bbox, &ray, false);
        // nearest corner at x ~= 1, offset (0.5, 0.5) in y/z
        assert!((d - (4.0f32 + 0.5).sqrt()).abs() < 0.01);

        let ortho = visibility_distance(&bbox, &ray, true);
        // max x projected onto -x
        assert!((ortho + 1.0).abs() < 0.01);
    }

    #[test]
    fn test_front_to_back_and_back_to_front() {
        let mut catalog = row();
        assert_eq!(catalog.len(), 4);
        let view = view_from_pos_x();

        let front = ViewSorter::new(UpdateOrder::FrontToBack);
        let order = front.sorted_by_view(&mut catalog, &view).to_vec();
        assert_eq!(order, vec![BrickId(3), BrickId(2), BrickId(1), BrickId(0)]);
        assert!(!catalog.needs_resort());

        catalog.set_needs_resort();
        let back = ViewSorter::new(UpdateOrder::BackToFront);
        let order = back.sorted_by_view(&mut catalog, &view).to_vec();
        assert_eq!(order, vec![BrickId(0), BrickId(1), BrickId(2), BrickId(3)]);
    }

    #[test]
    fn test_resort_only_when_flagged() {
        let mut catalog = row();
        let sorter = ViewSorter::new(UpdateOrder::FrontToBack);
        let first = sorter.sorted_by_view(&mut catalog, &view_from_pos_x()).to_vec();

        // Opposite side, but no resort requested: cached order is kept
        let other = ViewState::perspective(Vec3::new(-5.0, 0.5, 0.5), Vec3::new(0.0, 0.5, 0.5), 1.0);
        assert_eq!(sorter.sorted_by_view(&mut catalog, &other), first.as_slice());

        catalog.set_needs_resort();
        let resorted = sorter.sorted_by_view(&mut catalog, &other).to_vec();
        assert_eq!(resorted, vec![BrickId(0), BrickId(1), BrickId(2), BrickId(3)]);
    }

    #[test]
    fn test_ties_broken_by_index() {
        // 2x2 grid in x/y viewed straight down z: all bricks equally far
        let mut catalog = BrickCatalog::partition(
            VolumeId(0), UVec3::new(8, 8, 4), UVec3::new(5, 5, 4), Vec3::ONE, vec![],
        ).unwrap();
        let ray = Ray::new(Vec3::new(0.5, 0.5, 5.0), Vec3::NEG_Z);
        let mut ids = vec![BrickId(3), BrickId(1), BrickId(2), BrickId(0)];
        rank_by_view(catalog.bricks_mut(), &mut ids, &ray, true, UpdateOrder::FrontToBack);
        assert_eq!(ids, vec![BrickId(0), BrickId(1), BrickId(2), BrickId(3)]);

        rank_by_view(catalog.bricks_mut(), &mut ids, &ray, true, UpdateOrder::BackToFront);
        assert_eq!(ids, vec![BrickId(0), BrickId(1), BrickId(2), BrickId(3)]);
    }

    #[test]
    fn test_unknown_ids_sort_last() {
        let mut catalog = row();
        let ray = Ray::new(Vec3::new(5.0, 0.5, 0.5), Vec3::NEG_X);
        let mut ids = vec![BrickId(0), BrickId(42), BrickId(3), BrickId(7)];
        rank_by_view(catalog.bricks_mut(), &mut ids, &ray, false, UpdateOrder::FrontToBack);
        assert_eq!(ids, vec![BrickId(3), BrickId(0), BrickId(7), BrickId(42)]);
    }

    #[test]
    fn test_quota_nearest_to_center() {
        let mut catalog = row();
        catalog.set_priority(BrickId(1), 1);
        let sorter = ViewSorter::new(UpdateOrder::FrontToBack);

        // Center on brick 0; brick 1 is pending so bricks 0 and 2 are taken
        let quota = sorter.sorted_by_quota(&mut catalog, Vec3::new(0.1, 0.5, 0.5), 2, true, &view_from_pos_x()).to_vec();
        assert_eq!(quota, vec![BrickId(2), BrickId(0)]);

        catalog.set_needs_resort();
        let quota = sorter.sorted_by_quota(&mut catalog, Vec3::new(0.1, 0.5, 0.5), 2, false, &view_from_pos_x()).to_vec();
        assert_eq!(quota, vec![BrickId(1), BrickId(0)]);
    }

    #[test]
    fn test_quota_larger_than_catalog() {
        let mut catalog = row();
        let quota = ViewSorter::default()
            .sorted_by_quota(&mut catalog, Vec3::splat(0.5), 100, true, &view_from_pos_x())
            .len();
        assert_eq!(quota, 4);
    }
}
