//! Projections of analysis results into the persistence-record shape an
//! external store consumes: per feature `{value, prediction, alert}`.

use chrono::NaiveDateTime;
use contam_core::{ChannelMessage, Feature, TickResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub value: f64,
    /// Next-step forecast, when one was produced.
    pub prediction: Option<f64>,
    pub alert: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadingRecord {
    pub timestamp: NaiveDateTime,
    #[serde(rename = "Ni")]
    pub nickel: FeatureRecord,
    #[serde(rename = "Co")]
    pub cobalt: FeatureRecord,
    #[serde(rename = "NH3")]
    pub nh3: FeatureRecord,
}

impl ReadingRecord {
    pub fn feature(&self, feature: Feature) -> &FeatureRecord {
        match feature {
            Feature::Nickel => &self.nickel,
            Feature::Cobalt => &self.cobalt,
            Feature::Nh3 => &self.nh3,
        }
    }
}

pub fn project_tick(result: &TickResult) -> ReadingRecord {
    let next = result.predictions.as_ref().and_then(|points| points.first());
    let record = |feature: Feature| FeatureRecord {
        value: result.readings.get(feature),
        prediction: next.map(|p| p.values.get(feature)),
        alert: result.alerts.get(&feature).copied().unwrap_or(false),
    };
    ReadingRecord {
        timestamp: result.timestamp,
        nickel: record(Feature::Nickel),
        cobalt: record(Feature::Cobalt),
        nh3: record(Feature::Nh3),
    }
}

/// Only per-tick messages carry storable results.
pub fn project_message(message: &ChannelMessage) -> Option<ReadingRecord> {
    match message {
        ChannelMessage::Tick(tick) => Some(project_tick(&tick.result)),
        ChannelMessage::Connect(_) => None,
    }
}
