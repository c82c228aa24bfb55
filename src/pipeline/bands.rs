//! Bollinger-style volatility band over a closed slow window

use super::types::WindowSummary;
use serde::{Deserialize, Serialize};

/// Volume-weighted standard deviation and the envelope derived from it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub vwstd: f64,
    pub upper: f64,
    pub lower: f64,
}

/// sqrt(E[X²] − E[X]²), clamped at zero against cancellation error
pub fn weighted_std(mean: f64, second_moment: f64) -> f64 {
    (second_moment - mean * mean).max(0.0).sqrt()
}

/// Stateless band calculator with multiplier `k`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandCalculator {
    k: f64,
}

impl BandCalculator {
    pub fn new(k: f64) -> Self {
        Self { k }
    }

    pub fn with_defaults() -> Self {
        Self::new(2.0)
    }

    pub fn band(&self, summary: &WindowSummary) -> Band {
        let vwstd = weighted_std(summary.vwap, summary.vwap_second_moment);
        Band {
            vwstd,
            upper: summary.vwap + self.k * vwstd,
            lower: summary.vwap - self.k * vwstd,
        }
    }

    /// Return the summary with its band attached
    pub fn apply(&self, mut summary: WindowSummary) -> WindowSummary {
        summary.band = Some(self.band(&summary));
        summary
    }
}

impl Default for BandCalculator {
    fn default() -> Self {
        Self::with_defaults()
    }
}
