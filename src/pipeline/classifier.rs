//! Band breakout classification with a volume significance filter

use super::join::JoinedStats;
use super::types::{Action, JoinedRecord};

pub struct AlertClassifier {
    min_volume: f64,
}

impl AlertClassifier {
    pub fn new(min_volume: f64) -> Self {
        Self { min_volume }
    }

    pub fn with_defaults() -> Self {
        Self::new(10_000.0)
    }

    /// Decide `is_alert` and `action` for one joined record
    ///
    /// - alert: volume above the floor AND vwap strictly outside the band
    /// - alerts above the upper bound are `sell`, below the lower bound
    ///   `buy`; every non-alert is `hodl`, including a low-volume breach
    ///
    /// Touching a bound exactly is not a breakout.
    pub fn classify(&self, stats: JoinedStats) -> JoinedRecord {
        let above = stats.vwap > stats.bollinger_upper;
        let below = stats.vwap < stats.bollinger_lower;
        let is_alert = stats.volume > self.min_volume && (above || below);

        let action = match (is_alert, above) {
            (true, true) => Action::Sell,
            (true, false) => Action::Buy,
            (false, _) => Action::Hodl,
        };

        JoinedRecord {
            instrument: stats.instrument,
            t: stats.t,
            volume: stats.volume,
            vwap: stats.vwap,
            bollinger_upper: stats.bollinger_upper,
            bollinger_lower: stats.bollinger_lower,
            is_alert,
            action,
        }
    }
}

impl Default for AlertClassifier {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::millis_to_utc;

    fn stats(volume: f64, vwap: f64, lower: f64, upper: f64) -> JoinedStats {
        JoinedStats {
            instrument: "AAPL".to_string(),
            t: millis_to_utc(1_700_000_040_000).unwrap(),
            volume,
            vwap,
            bollinger_upper: upper,
            bollinger_lower: lower,
        }
    }

    #[test]
    fn test_breakout_above_band_sells() {
        let record = AlertClassifier::with_defaults().classify(stats(15_000.0, 105.0, 90.0, 100.0));
        assert!(record.is_alert);
        assert_eq!(record.action, Action::Sell);
    }

    #[test]
    fn test_low_volume_suppresses_alert() {
        let record = AlertClassifier::with_defaults().classify(stats(5_000.0, 105.0, 90.0, 100.0));
        assert!(!record.is_alert);
        assert_eq!(record.action, Action::Hodl);
    }

    #[test]
    fn test_breakout_below_band_buys() {
        let record = AlertClassifier::with_defaults().classify(stats(15_000.0, 85.0, 90.0, 100.0));
        assert!(record.is_alert);
        assert_eq!(record.action, Action::Buy);

        let quiet = AlertClassifier::with_defaults().classify(stats(9_000.0, 85.0, 90.0, 100.0));
        assert!(!quiet.is_alert);
        assert_eq!(quiet.action, Action::Hodl);
    }

    #[test]
    fn test_inside_band_holds() {
        let record = AlertClassifier::with_defaults().classify(stats(50_000.0, 95.0, 90.0, 100.0));
        assert!(!record.is_alert);
        assert_eq!(record.action, Action::Hodl);
    }

    #[test]
    fn test_touching_bounds_is_not_a_breakout() {
        let classifier = AlertClassifier::with_defaults();

        let upper = classifier.classify(stats(50_000.0, 100.0, 90.0, 100.0));
        assert!(!upper.is_alert);
        assert_eq!(upper.action, Action::Hodl);

        let lower = classifier.classify(stats(50_000.0, 90.0, 90.0, 100.0));
        assert!(!lower.is_alert);
        assert_eq!(lower.action, Action::Hodl);
    }

    #[test]
    fn test_volume_floor_is_strict() {
        let record = AlertClassifier::with_defaults().classify(stats(10_000.0, 105.0, 90.0, 100.0));
        assert!(!record.is_alert);
    }
}
