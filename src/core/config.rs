//! Streaming configuration
//!
//! Consumed (never owned) by the scheduler: the scheduler reads it once at
//! the top of each slice and derives a tagged slice mode from it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::streaming::estimator::EstimatorMode;

/// Compositing order of the bricks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOrder {
    /// Nearest bricks first (ascending distance)
    #[default]
    FrontToBack,
    /// Farthest bricks first (descending distance)
    BackToFront,
}

/// Configuration of the out-of-core streaming loop
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Out-of-core streaming on/off. Off draws every visible brick at once.
    pub mem_swap: bool,
    /// Ceiling of GPU memory for resident bricks (bytes)
    pub memory_budget_bytes: u64,
    /// Wall-clock budget of one slice (milliseconds)
    pub slice_budget_ms: u64,
    /// Brick compositing order
    pub update_order: UpdateOrder,
    /// Throughput estimator used to size interactive quotas
    pub estimator: EstimatorMode,
    /// Draw only the nearest bricks to the quota center while interacting
    pub interactive_shortcut: bool,
    /// Number of past slices kept by the throughput history
    pub history_capacity: usize,
    /// Optional cap on bricks completed per slice
    pub max_bricks_per_slice: Option<usize>,
    /// Quota center movement (object space) that forces a resort
    pub quota_resort_threshold: f32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            mem_swap: true,
            memory_budget_bytes: 1024 * 1024 * 1024, // 1 GB
            slice_budget_ms: 100,
            update_order: UpdateOrder::FrontToBack,
            estimator: EstimatorMode::Mean,
            interactive_shortcut: true,
            history_capacity: 5,
            max_bricks_per_slice: None,
            quota_resort_threshold: 0.01,
        }
    }
}

impl StreamingConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Save to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject values the scheduler cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.slice_budget_ms == 0 {
            return Err(Error::Config("slice_budget_ms must be greater than 0".into()));
        }
        if self.history_capacity == 0 {
            return Err(Error::Config("history_capacity must be greater than 0".into()));
        }
        if self.max_bricks_per_slice == Some(0) {
            return Err(Error::Config("max_bricks_per_slice must be greater than 0".into()));
        }
        if !(self.quota_resort_threshold >= 0.0) {
            return Err(Error::Config("quota_resort_threshold must be non-negative".into()));
        }
        Ok(())
    }

    /// Slice budget as a `Duration`
    pub fn slice_budget(&self) -> Duration {
        Duration::from_millis(self.slice_budget_ms)
    }
}
