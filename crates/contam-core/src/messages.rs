//! Message shapes published on the real-time channel.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::domain::{AlertSet, ForecastPoint, Reading, TickMetadata, TickResult};
use crate::thresholds::no_alerts;

/// Greeting for a newly connected subscriber: the latest window point and
/// an all-clear alert set. No history is replayed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectMessage {
    pub timestamp: NaiveDateTime,
    pub readings: Reading,
    pub predictions: Vec<ForecastPoint>,
    pub alerts: AlertSet,
}

impl ConnectMessage {
    pub fn snapshot(latest: Reading, now: NaiveDateTime) -> Self {
        Self {
            timestamp: now,
            readings: latest,
            predictions: Vec::new(),
            alerts: no_alerts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickMessage {
    #[serde(flatten)]
    pub result: TickResult,
    pub metadata: TickMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ChannelMessage {
    #[serde(rename = "initialData")]
    Connect(ConnectMessage),
    #[serde(rename = "analysisData")]
    Tick(TickMessage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FeatureVector;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap().and_hms_opt(12, 30, 0).unwrap()
    }

    #[test]
    fn tick_message_shape() {
        let msg = ChannelMessage::Tick(TickMessage {
            result: TickResult {
                timestamp: ts(),
                readings: FeatureVector::new(0.3, 0.2, 11.0),
                predictions: None,
                alerts: AlertSet::new(),
            },
            metadata: TickMetadata { tick_count: 7, total_readings: 100, cursor_position: 7 },
        });
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["event"], "analysisData");
        let data = &v["data"];
        assert_eq!(data["readings"]["NH3"], 11.0);
        assert!(data["predictions"].is_null());
        assert_eq!(data["alerts"], serde_json::json!({}));
        assert_eq!(data["metadata"]["tickCount"], 7);
        assert_eq!(data["metadata"]["cursorPosition"], 7);
    }

    #[test]
    fn connect_message_shape() {
        let latest = Reading::new(ts(), FeatureVector::new(0.3, 0.2, 11.0));
        let msg = ChannelMessage::Connect(ConnectMessage::snapshot(latest, ts()));
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["event"], "initialData");
        assert_eq!(v["data"]["predictions"], serde_json::json!([]));
        assert_eq!(v["data"]["alerts"], serde_json::json!({"Nickel": false, "Cobalt": false, "NH3": false}));
        assert_eq!(v["data"]["readings"]["Nickel"], 0.3);
    }
}
