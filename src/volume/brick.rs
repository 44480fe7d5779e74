//! Brick - the unit of GPU residency and scheduling
//!
//! A brick is a box-shaped sub-block of a volume's texel grid. Its identity is
//! its index in the grid (x fastest, then y, then z) and is shared by every
//! channel partitioned with the same grid.

use crate::core::types::{Mat4, UVec3};
use crate::math::Aabb;

/// Index of a brick within its volume's grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrickId(pub u32);

impl BrickId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of a loaded volume (one channel)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeId(pub u32);

/// Render mode a brick can be drawn in; each keeps its own drawn flag
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RenderMode {
    #[default]
    Standard,
    Mip,
    Shading,
    Shadow,
}

impl RenderMode {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        match self {
            RenderMode::Standard => 0,
            RenderMode::Mip => 1,
            RenderMode::Shading => 2,
            RenderMode::Shadow => 3,
        }
    }
}

/// Per-render-mode drawn flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawnFlags([bool; RenderMode::COUNT]);

impl DrawnFlags {
    pub fn get(&self, mode: RenderMode) -> bool {
        self.0[mode.index()]
    }

    pub fn set(&mut self, mode: RenderMode, drawn: bool) {
        self.0[mode.index()] = drawn;
    }

    pub fn clear(&mut self) {
        self.0 = [false; RenderMode::COUNT];
    }
}

/// Face-adjacent bricks in the grid
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Neighbors {
    pub neg_x: Option<BrickId>,
    pub pos_x: Option<BrickId>,
    pub neg_y: Option<BrickId>,
    pub pos_y: Option<BrickId>,
    pub neg_z: Option<BrickId>,
    pub pos_z: Option<BrickId>,
}

impl Neighbors {
    /// All existing neighbors
    pub fn iter(&self) -> impl Iterator<Item = BrickId> + '_ {
        [self.neg_x, self.pos_x, self.neg_y, self.pos_y, self.neg_z, self.pos_z]
            .into_iter()
            .flatten()
    }
}

/// What a component stores
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// Scalar or multi-channel intensity data
    Data,
    /// Selection mask
    Mask,
    /// Connected-component labels
    Label,
}

/// Size of one texel channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TexelType {
    U8,
    U16,
    U32,
}

impl TexelType {
    pub fn bytes(self) -> u64 {
        match self {
            TexelType::U8 => 1,
            TexelType::U16 => 2,
            TexelType::U32 => 4,
        }
    }
}

/// Storage description of one component of a volume
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ComponentFormat {
    pub kind: ComponentKind,
    pub texel: TexelType,
    /// Channels per texel (1..=4)
    pub channels: u8,
}

impl ComponentFormat {
    pub fn new(kind: ComponentKind, texel: TexelType, channels: u8) -> Self {
        Self { kind, texel, channels: channels.clamp(1, 4) }
    }

    /// 8-bit single channel intensity
    pub fn data_u8() -> Self {
        Self::new(ComponentKind::Data, TexelType::U8, 1)
    }

    /// 16-bit single channel intensity
    pub fn data_u16() -> Self {
        Self::new(ComponentKind::Data, TexelType::U16, 1)
    }

    pub fn mask() -> Self {
        Self::new(ComponentKind::Mask, TexelType::U8, 1)
    }

    pub fn label() -> Self {
        Self::new(ComponentKind::Label, TexelType::U32, 1)
    }

    pub fn bytes_per_texel(&self) -> u64 {
        self.texel.bytes() * self.channels as u64
    }
}

/// One spatial block of a volume
#[derive(Clone, Debug)]
pub struct Brick {
    pub id: BrickId,
    /// Box in normalized object space [0,1]^3
    pub bbox: Aabb,
    /// Texel dimensions (including overlap)
    pub dims: UVec3,
    /// Texel offset of the brick's first texel in the volume
    pub offset: UVec3,
    /// 0 = drawable, >0 = not yet available (e.g. still loading)
    pub priority: u32,
    /// Transient sort key written by the view sorter
    pub distance: f32,
    pub drawn: DrawnFlags,
    pub neighbors: Neighbors,
}

impl Brick {
    pub fn new(id: BrickId, bbox: Aabb, dims: UVec3, offset: UVec3) -> Self {
        Self {
            id,
            bbox,
            dims,
            offset,
            priority: 0,
            distance: 0.0,
            drawn: DrawnFlags::default(),
            neighbors: Neighbors::default(),
        }
    }

    pub fn is_drawable(&self) -> bool {
        self.priority == 0
    }

    pub fn is_drawn(&self, mode: RenderMode) -> bool {
        self.drawn.get(mode)
    }

    pub fn set_drawn(&mut self, mode: RenderMode, drawn: bool) {
        self.drawn.set(mode, drawn);
    }

    /// Maps the unit cube onto the brick's box
    pub fn transform(&self) -> Mat4 {
        Mat4::from_translation(self.bbox.min) * Mat4::from_scale(self.bbox.size())
    }

    pub fn texel_count(&self) -> u64 {
        self.dims.x as u64 * self.dims.y as u64 * self.dims.z as u64
    }

    /// Resident size of one component of this brick
    pub fn byte_size(&self, format: &ComponentFormat) -> u64 {
        self.texel_count() * format.bytes_per_texel()
    }
}
