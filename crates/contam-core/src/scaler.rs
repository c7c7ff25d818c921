//! Per-feature min/max normalization, fit once from the training slice.

use serde::{Deserialize, Serialize};

use crate::domain::{Feature, FeatureVector, Reading, FEATURE_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureBounds {
    pub min: f64,
    pub max: f64,
}

impl FeatureBounds {
    /// Divisor used for scaling. A flat feature (min == max) scales by 1 so
    /// its values map to offsets from `min`.
    pub fn span(&self) -> f64 {
        let span = self.max - self.min;
        if span == 0.0 {
            1.0
        } else {
            span
        }
    }
}

/// Immutable scaler state. There is no re-fit on distribution drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    bounds: [FeatureBounds; FEATURE_COUNT],
}

impl FeatureScaler {
    /// Fit bounds across `data`. `None` when `data` is empty.
    pub fn fit(data: &[Reading]) -> Option<Self> {
        let first = data.first()?;
        let mut bounds = first.values.0.map(|v| FeatureBounds { min: v, max: v });
        for reading in &data[1..] {
            for (b, &v) in bounds.iter_mut().zip(reading.values.0.iter()) {
                b.min = b.min.min(v);
                b.max = b.max.max(v);
            }
        }
        Some(Self { bounds })
    }

    pub fn bounds(&self, feature: Feature) -> FeatureBounds {
        self.bounds[feature.index()]
    }

    pub fn scale(&self, value: f64, feature: Feature) -> f64 {
        let b = self.bounds(feature);
        (value - b.min) / b.span()
    }

    pub fn inverse_scale(&self, value: f64, feature: Feature) -> f64 {
        let b = self.bounds(feature);
        value * b.span() + b.min
    }

    pub fn scale_vector(&self, values: &FeatureVector) -> FeatureVector {
        values.map(|f, v| self.scale(v, f))
    }

    pub fn inverse_vector(&self, values: &FeatureVector) -> FeatureVector {
        values.map(|f, v| self.inverse_scale(v, f))
    }
}
