//! Error types for the streaming core

use thiserror::Error;

/// Main error type for the crate
///
/// Admission failures and deadline cutoffs are not errors; they are reported
/// as values by the cache and the scheduler.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Channel {channel} does not share the brick grid of channel 0 (expected {expected} bricks, found {found})")]
    GridMismatch {
        channel: usize,
        expected: usize,
        found: usize,
    },

    #[error("Unknown channel {0}")]
    UnknownChannel(usize),
}
