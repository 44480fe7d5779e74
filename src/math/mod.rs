//! Mathematical utilities and data structures

pub mod aabb;
pub mod ray;
pub mod frustum;
pub mod view;

pub use aabb::Aabb;
pub use ray::Ray;
pub use frustum::{Plane, Frustum};
pub use view::ViewState;
