use std::collections::BTreeMap;
use std::ops::Index;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Number of monitored contaminants.
pub const FEATURE_COUNT: usize = 3;

/// Monitored contaminant. Declaration order is the model's feature order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Feature {
    Nickel,
    Cobalt,
    #[serde(rename = "NH3")]
    Nh3,
}

impl Feature {
    pub const ALL: [Feature; FEATURE_COUNT] = [Feature::Nickel, Feature::Cobalt, Feature::Nh3];

    /// Column name in the dataset source and key on the wire.
    pub fn name(self) -> &'static str {
        match self {
            Feature::Nickel => "Nickel",
            Feature::Cobalt => "Cobalt",
            Feature::Nh3 => "NH3",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// One value per feature, in `Feature::ALL` order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "FeatureValuesRepr", into = "FeatureValuesRepr")]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn new(nickel: f64, cobalt: f64, nh3: f64) -> Self {
        Self([nickel, cobalt, nh3])
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.0[feature.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        Feature::ALL.iter().map(move |&f| (f, self.get(f)))
    }

    pub fn map(&self, mut f: impl FnMut(Feature, f64) -> f64) -> Self {
        Self(std::array::from_fn(|i| f(Feature::ALL[i], self.0[i])))
    }
}

impl Index<Feature> for FeatureVector {
    type Output = f64;

    fn index(&self, feature: Feature) -> &f64 {
        &self.0[feature.index()]
    }
}

#[derive(Serialize, Deserialize)]
struct FeatureValuesRepr {
    #[serde(rename = "Nickel")]
    nickel: f64,
    #[serde(rename = "Cobalt")]
    cobalt: f64,
    #[serde(rename = "NH3")]
    nh3: f64,
}

impl From<FeatureValuesRepr> for FeatureVector {
    fn from(r: FeatureValuesRepr) -> Self {
        Self::new(r.nickel, r.cobalt, r.nh3)
    }
}

impl From<FeatureVector> for FeatureValuesRepr {
    fn from(v: FeatureVector) -> Self {
        Self { nickel: v.0[0], cobalt: v.0[1], nh3: v.0[2] }
    }
}

/// A single timestamped sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    #[serde(flatten)]
    pub values: FeatureVector,
}

impl Reading {
    pub fn new(timestamp: NaiveDateTime, values: FeatureVector) -> Self {
        Self { timestamp, values }
    }
}

/// One step of a forecast horizon, in raw units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: NaiveDateTime,
    #[serde(flatten)]
    pub values: FeatureVector,
}

/// Per-feature breach flags. Empty when no forecast was produced.
pub type AlertSet = BTreeMap<Feature, bool>;

/// Outcome of analysing one reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickResult {
    pub timestamp: NaiveDateTime,
    pub readings: FeatureVector,
    pub predictions: Option<Vec<ForecastPoint>>,
    pub alerts: AlertSet,
}

/// Loop counters attached to every broadcast tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickMetadata {
    pub tick_count: u64,
    pub total_readings: usize,
    pub cursor_position: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(8, 0, 0).unwrap()
    }

    #[test]
    fn feature_order_matches_indices() {
        for (i, f) in Feature::ALL.iter().enumerate() {
            assert_eq!(f.index(), i);
        }
        assert_eq!(Feature::Nh3.name(), "NH3");
    }

    #[test]
    fn reading_serializes_flat() {
        let r = Reading::new(ts(), FeatureVector::new(0.5, 0.25, 12.0));
        let v = serde_json::to_value(r).unwrap();
        assert_eq!(v["Nickel"], 0.5);
        assert_eq!(v["Cobalt"], 0.25);
        assert_eq!(v["NH3"], 12.0);
        assert!(v["timestamp"].is_string());

        let back: Reading = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn alert_keys_use_wire_names() {
        let mut alerts = AlertSet::new();
        alerts.insert(Feature::Nh3, true);
        let v = serde_json::to_value(&alerts).unwrap();
        assert_eq!(v["NH3"], true);
    }

    #[test]
    fn metadata_is_camel_case() {
        let m = TickMetadata { tick_count: 3, total_readings: 100, cursor_position: 3 };
        let v = serde_json::to_value(m).unwrap();
        assert_eq!(v["tickCount"], 3);
        assert_eq!(v["totalReadings"], 100);
        assert_eq!(v["cursorPosition"], 3);
    }
}
