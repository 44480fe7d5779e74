//! Volume bricks and their per-volume catalog

pub mod brick;
pub mod catalog;

pub use brick::{
    Brick, BrickId, ComponentFormat, ComponentKind, DrawnFlags, Neighbors, RenderMode, TexelType,
    VolumeId,
};
pub use catalog::BrickCatalog;
