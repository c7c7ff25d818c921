use serde::{Deserialize, Serialize};

use crate::domain::{AlertSet, Feature, ForecastPoint};

/// Static safety limits, in raw units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub nickel: f64,
    pub cobalt: f64,
    pub nh3: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            nickel: 1.0,
            cobalt: 0.8,
            nh3: 25.0,
        }
    }
}

impl ThresholdConfig {
    pub fn limit(&self, feature: Feature) -> f64 {
        match feature {
            Feature::Nickel => self.nickel,
            Feature::Cobalt => self.cobalt,
            Feature::Nh3 => self.nh3,
        }
    }
}

/// A feature alerts iff any forecast point strictly exceeds its limit.
pub fn check_thresholds(points: &[ForecastPoint], limits: &ThresholdConfig) -> AlertSet {
    Feature::ALL
        .iter()
        .map(|&f| (f, points.iter().any(|p| p.values.get(f) > limits.limit(f))))
        .collect()
}

/// All-clear alert set, as sent to newly connected subscribers.
pub fn no_alerts() -> AlertSet {
    Feature::ALL.iter().map(|&f| (f, false)).collect()
}
