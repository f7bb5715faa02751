//! Sliding-window sample storage and summary statistics

use std::collections::VecDeque;

/// One timestamped measurement, seconds offset from the run origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// When the sample was taken
    pub at: f64,
    /// The measured value
    pub value: f64,
}

/// Time-ordered sample window with oldest-first eviction
///
/// Samples are appended in arrival order; `trim` drops everything older than
/// the given horizon from the front.
#[derive(Debug, Default)]
pub struct SlidingWindow {
    samples: VecDeque<Sample>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample taken at the given offset.
    pub fn push(&mut self, at: f64, value: f64) {
        self.samples.push_back(Sample { at, value });
    }

    /// Drop samples older than `horizon` seconds from the run origin.
    pub fn trim(&mut self, horizon: f64) {
        while let Some(front) = self.samples.front() {
            if front.at >= horizon {
                break;
            }
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Current values, in arrival order.
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    /// Sum of the current values.
    pub fn sum(&self) -> f64 {
        self.samples.iter().map(|s| s.value).sum()
    }
}

/// Arithmetic mean; None for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Linearly interpolated percentile; None for an empty slice.
///
/// `pct` is in [0, 100]. Matches the conventional definition where the rank
/// is `pct/100 * (n-1)` over the sorted values.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
