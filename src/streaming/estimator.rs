//! Throughput estimation
//!
//! Predicts how many bricks the next slice can complete from a short
//! history of completed-per-slice counts. The history starts filled with
//! zeros, which the mean and median strategies treat as "no sample".

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed-capacity ring of bricks completed per past slice (oldest first)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThroughputHistory {
    entries: VecDeque<u32>,
}

impl ThroughputHistory {
    /// History of `capacity` zero entries (capacity of at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: std::iter::repeat_n(0, capacity).collect() }
    }

    /// Build a history from recorded values, oldest first
    pub fn from_values(values: &[u32]) -> Self {
        let mut history = Self::new(values.len());
        for &v in values {
            history.push(v);
        }
        history
    }

    /// Append a sample, dropping the oldest
    pub fn push(&mut self, completed: u32) {
        self.entries.pop_front();
        self.entries.push_back(completed);
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Entry `i`, 0 being the oldest
    pub fn get(&self, i: usize) -> u32 {
        self.entries.get(i).copied().unwrap_or(0)
    }

    pub fn last(&self) -> u32 {
        self.entries.back().copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().copied()
    }

    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = 0);
    }
}

/// Estimation strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorMode {
    /// Mean of the non-zero samples and the seed
    #[default]
    Mean,
    /// Weighted mean, weight (i+1)^2 for sample i
    Trend,
    /// Least-squares line extrapolated one slice ahead, at least 1
    Regression,
    /// Last sample
    MostRecent,
    /// Median, or the non-zero mean when some samples are zero
    Median,
}

type Strategy = fn(&ThroughputHistory, u32) -> f64;

impl EstimatorMode {
    pub const ALL: [EstimatorMode; 5] = [
        EstimatorMode::Mean,
        EstimatorMode::Trend,
        EstimatorMode::Regression,
        EstimatorMode::MostRecent,
        EstimatorMode::Median,
    ];

    fn strategy(self) -> Strategy {
        match self {
            EstimatorMode::Mean => mean,
            EstimatorMode::Trend => trend,
            EstimatorMode::Regression => regression,
            EstimatorMode::MostRecent => most_recent,
            EstimatorMode::Median => median,
        }
    }
}

fn mean(history: &ThroughputHistory, seed: u32) -> f64 {
    let (sum, count) = history.iter()
        .filter(|&v| v != 0)
        .fold((0.0, 0u32), |(s, c), v| (s + v as f64, c + 1));
    (sum + seed as f64) / (count + 1) as f64
}

fn trend(history: &ThroughputHistory, _seed: u32) -> f64 {
    let (sum, weights) = history.iter()
        .enumerate()
        .fold((0.0, 0.0), |(s, ws), (i, v)| {
            let w = ((i + 1) * (i + 1)) as f64;
            (s + v as f64 * w, ws + w)
        });
    sum / weights
}

fn regression(history: &ThroughputHistory, _seed: u32) -> f64 {
    let n = history.capacity() as f64;
    if history.capacity() < 2 {
        return (history.last() as f64).max(1.0);
    }

    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0, 0.0);
    for (i, v) in history.iter().enumerate() {
        let (x, y) = (i as f64, v as f64);
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }
    let beta = (sum_xy / n - sum_x * sum_y / n / n) / (sum_x2 / n - sum_x * sum_x / n / n);

    // Value of the fitted line at x = n (one slice past the newest sample)
    (sum_y / n - beta * sum_x / n + beta * n).max(1.0)
}

fn most_recent(history: &ThroughputHistory, _seed: u32) -> f64 {
    history.last() as f64
}

fn median(history: &ThroughputHistory, _seed: u32) -> f64 {
    let mut sorted: Vec<u32> = history.iter().collect();
    sorted.sort_unstable();

    let non_zero: Vec<u32> = sorted.iter().copied().filter(|&v| v != 0).collect();
    if non_zero.is_empty() {
        0.0
    } else if non_zero.len() == sorted.len() {
        sorted[sorted.len() / 2] as f64
    } else {
        non_zero.iter().map(|&v| v as f64).sum::<f64>() / non_zero.len() as f64
    }
}

/// History plus strategy selection
#[derive(Clone, Debug)]
pub struct ThroughputEstimator {
    history: ThroughputHistory,
    mode: EstimatorMode,
}

impl ThroughputEstimator {
    pub fn new(capacity: usize, mode: EstimatorMode) -> Self {
        Self {
            history: ThroughputHistory::new(capacity),
            mode,
        }
    }

    pub fn history(&self) -> &ThroughputHistory {
        &self.history
    }

    pub fn mode(&self) -> EstimatorMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: EstimatorMode) {
        self.mode = mode;
    }

    /// Record bricks completed by the slice that just ended
    pub fn record(&mut self, completed: u32) {
        self.history.push(completed);
    }

    /// Predicted bricks for the next slice
    pub fn estimate(&self, mode: EstimatorMode, seed: u32) -> u32 {
        let value = (mode.strategy())(&self.history, seed);
        if value.is_finite() && value > 0.0 {
            value as u32
        } else {
            0
        }
    }

    /// Estimate with the configured mode
    pub fn predict(&self, seed: u32) -> u32 {
        self.estimate(self.mode, seed)
    }

    /// Bricks to draw in an interactive slice
    ///
    /// `budget` is the (speed-corrected) slice budget and `consumed` the time
    /// the previous slice took. Without a measured slice every brick is
    /// requested; a slice that ran over budget by more than `total` times
    /// drops to a single brick. Never 0 while `total` is not, so a slice that
    /// drew nothing cannot starve the following ones.
    pub fn interactive_quota(&self, total: u32, budget: Duration, consumed: Duration) -> u32 {
        let budget_ns = budget.as_nanos().max(1);
        let consumed_ns = consumed.as_nanos();
        let quota = if consumed_ns == 0 {
            total
        } else if consumed_ns / budget_ns > total as u128 {
            1
        } else {
            let last = self.estimate(EstimatorMode::MostRecent, 0) as u128;
            let adjusted = (last * budget_ns / consumed_ns).min(u32::MAX as u128) as u32;
            self.predict(adjusted.max(1)).max(1)
        };
        quota.min(total)
    }
}
