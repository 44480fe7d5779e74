//! volstream - out-of-core brick streaming for progressive volume rendering

pub mod core;
pub mod math;
pub mod volume;
pub mod streaming;
