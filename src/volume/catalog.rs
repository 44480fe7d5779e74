//! Brick catalog - a volume's bricks and its cached visiting orders

use crate::core::error::Error;
use crate::core::types::{Result, UVec3, Vec3};
use crate::math::Aabb;
use super::brick::{Brick, BrickId, ComponentFormat, Neighbors, RenderMode, VolumeId};

/// All bricks of one volume (channel), in grid order
#[derive(Clone, Debug)]
pub struct BrickCatalog {
    volume: VolumeId,
    /// Bricks per axis
    grid_dims: UVec3,
    /// Texel spacing in world units
    spacing: Vec3,
    components: Vec<ComponentFormat>,
    bricks: Vec<Brick>,
    needs_resort: bool,
    /// Cached view order
    pub(crate) sorted: Vec<BrickId>,
    /// Cached quota order
    pub(crate) quota: Vec<BrickId>,
}

/// Split one axis of `size` texels into bricks of at most `brick` texels,
/// neighbours overlapping by one texel. Returns (offset, extent) pairs.
fn split_axis(size: u32, brick: u32) -> Vec<(u32, u32)> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < size {
        if i > 0 {
            i -= 1;
        }
        spans.push((i, brick.min(size - i)));
        i += brick;
    }
    spans
}

/// Normalized [min, max] of a span, with half-texel insets on interior faces
fn span_bounds(offset: u32, extent: u32, size: u32) -> (f32, f32) {
    let n = size as f32;
    let min = if offset == 0 { 0.0 } else { (offset as f32 + 0.5) / n };
    let max = if offset + extent >= size {
        1.0
    } else {
        (offset as f32 + extent as f32 - 0.5) / n
    };
    (min, max)
}

impl BrickCatalog {
    /// Partition a volume of `dims` texels into bricks of at most `brick_size`
    pub fn partition(
        volume: VolumeId,
        dims: UVec3,
        brick_size: UVec3,
        spacing: Vec3,
        components: Vec<ComponentFormat>,
    ) -> Result<Self> {
        if dims.min_element() == 0 {
            return Err(Error::Config(format!("volume dimensions must be non-zero, got {dims}")));
        }
        if brick_size.min_element() < 2 {
            return Err(Error::Config(format!("brick size must be at least 2, got {brick_size}")));
        }

        let xs = split_axis(dims.x, brick_size.x);
        let ys = split_axis(dims.y, brick_size.y);
        let zs = split_axis(dims.z, brick_size.z);
        let grid_dims = UVec3::new(xs.len() as u32, ys.len() as u32, zs.len() as u32);

        let mut bricks = Vec::with_capacity(xs.len() * ys.len() * zs.len());
        for &(oz, ez) in &zs {
            for &(oy, ey) in &ys {
                for &(ox, ex) in &xs {
                    let (x0, x1) = span_bounds(ox, ex, dims.x);
                    let (y0, y1) = span_bounds(oy, ey, dims.y);
                    let (z0, z1) = span_bounds(oz, ez, dims.z);
                    let id = BrickId(bricks.len() as u32);
                    bricks.push(Brick::new(
                        id,
                        Aabb::new(Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1)),
                        UVec3::new(ex, ey, ez),
                        UVec3::new(ox, oy, oz),
                    ));
                }
            }
        }

        let mut catalog = Self::new(volume, grid_dims, spacing, components, bricks);
        catalog.link_neighbors();

        log::debug!(
            "Partitioned volume {:?} ({}) into {} bricks ({} grid)",
            volume, dims, catalog.len(), grid_dims
        );
        Ok(catalog)
    }

    /// Wrap an externally produced brick list laid out on `grid_dims`
    ///
    /// Brick ids must equal their grid index.
    pub fn from_bricks(
        volume: VolumeId,
        grid_dims: UVec3,
        spacing: Vec3,
        components: Vec<ComponentFormat>,
        bricks: Vec<Brick>,
    ) -> Result<Self> {
        let expected = (grid_dims.x * grid_dims.y * grid_dims.z) as usize;
        if bricks.len() != expected {
            return Err(Error::Config(format!(
                "{} bricks do not fill a {} grid", bricks.len(), grid_dims
            )));
        }
        if let Some(b) = bricks.iter().enumerate().find(|(i, b)| b.id.index() != *i) {
            return Err(Error::Config(format!("brick {:?} stored at index {}", b.1.id, b.0)));
        }

        let mut catalog = Self::new(volume, grid_dims, spacing, components, bricks);
        catalog.link_neighbors();
        Ok(catalog)
    }

    fn new(
        volume: VolumeId,
        grid_dims: UVec3,
        spacing: Vec3,
        components: Vec<ComponentFormat>,
        bricks: Vec<Brick>,
    ) -> Self {
        Self {
            volume,
            grid_dims,
            spacing,
            components,
            bricks,
            needs_resort: true,
            sorted: Vec::new(),
            quota: Vec::new(),
        }
    }

    fn grid_id(&self, x: u32, y: u32, z: u32) -> BrickId {
        BrickId(x + self.grid_dims.x * (y + self.grid_dims.y * z))
    }

    fn link_neighbors(&mut self) {
        let g = self.grid_dims;
        for z in 0..g.z {
            for y in 0..g.y {
                for x in 0..g.x {
                    let neighbors = Neighbors {
                        neg_x: (x > 0).then(|| self.grid_id(x - 1, y, z)),
                        pos_x: (x + 1 < g.x).then(|| self.grid_id(x + 1, y, z)),
                        neg_y: (y > 0).then(|| self.grid_id(x, y - 1, z)),
                        pos_y: (y + 1 < g.y).then(|| self.grid_id(x, y + 1, z)),
                        neg_z: (z > 0).then(|| self.grid_id(x, y, z - 1)),
                        pos_z: (z + 1 < g.z).then(|| self.grid_id(x, y, z + 1)),
                    };
                    let id = self.grid_id(x, y, z);
                    self.bricks[id.index()].neighbors = neighbors;
                }
            }
        }
    }

    pub fn volume(&self) -> VolumeId {
        self.volume
    }

    pub fn grid_dims(&self) -> UVec3 {
        self.grid_dims
    }

    pub fn spacing(&self) -> Vec3 {
        self.spacing
    }

    pub fn components(&self) -> &[ComponentFormat] {
        &self.components
    }

    pub fn component(&self, index: u8) -> Option<&ComponentFormat> {
        self.components.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.bricks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bricks.is_empty()
    }

    pub fn bricks(&self) -> &[Brick] {
        &self.bricks
    }

    pub fn brick(&self, id: BrickId) -> Option<&Brick> {
        self.bricks.get(id.index())
    }

    pub fn brick_mut(&mut self, id: BrickId) -> Option<&mut Brick> {
        self.bricks.get_mut(id.index())
    }

    pub(crate) fn bricks_mut(&mut self) -> &mut [Brick] {
        &mut self.bricks
    }

    /// Same grid, and every brick covers the same box with the same texel dims
    pub fn shares_partition(&self, other: &BrickCatalog) -> bool {
        self.grid_dims == other.grid_dims
            && self.bricks.len() == other.bricks.len()
            && self.bricks
                .iter()
                .zip(&other.bricks)
                .all(|(a, b)| a.bbox == b.bbox && a.dims == b.dims)
    }

    // --- Order cache ---

    pub fn needs_resort(&self) -> bool {
        self.needs_resort
    }

    /// Invalidate the cached orders (view, focal point or volume changed)
    pub fn set_needs_resort(&mut self) {
        self.needs_resort = true;
    }

    pub(crate) fn clear_needs_resort(&mut self) {
        self.needs_resort = false;
    }

    /// Last view-sorted order
    pub fn sorted(&self) -> &[BrickId] {
        &self.sorted
    }

    /// Last merged quota
    pub fn quota(&self) -> &[BrickId] {
        &self.quota
    }

    // --- Per-brick state ---

    /// Mark a brick as (un)available; returns false for an unknown brick
    pub fn set_priority(&mut self, id: BrickId, priority: u32) -> bool {
        match self.bricks.get_mut(id.index()) {
            Some(brick) => {
                brick.priority = priority;
                true
            }
            None => false,
        }
    }

    /// Clear the drawn flag of every brick for `mode`
    pub fn reset_drawn(&mut self, mode: RenderMode) {
        for brick in &mut self.bricks {
            brick.set_drawn(mode, false);
        }
    }

    /// Bricks drawn in `mode`
    pub fn drawn_count(&self, mode: RenderMode) -> usize {
        self.bricks.iter().filter(|b| b.is_drawn(mode)).count()
    }

    /// Bricks with priority 0
    pub fn drawable_count(&self) -> usize {
        self.bricks.iter().filter(|b| b.is_drawable()).count()
    }
}
