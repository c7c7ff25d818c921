//! Row-level validation for dataset sources.

use chrono::{DateTime, NaiveDateTime};
use thiserror::Error;

use crate::domain::{Feature, FeatureVector, Reading, FEATURE_COUNT};

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Why a row was dropped. Never fatal on its own.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing value for column {0}")]
    MissingColumn(&'static str),
    #[error("unparsable timestamp {0:?}")]
    BadTimestamp(String),
    #[error("non-numeric {feature} value {raw:?}")]
    NonNumeric { feature: &'static str, raw: String },
    #[error("non-finite {0} value")]
    NonFinite(&'static str),
}

/// Parse a timestamp in the dataset's `YYYY-MM-DD HH:MM:SS` layout, also
/// accepting ISO-8601 and RFC 3339 forms.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, ValidationError> {
    let raw = raw.trim();
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(ts);
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .map_err(|_| ValidationError::BadTimestamp(raw.to_string()))
}

/// Reject NaN/Inf feature values.
pub fn validate_features(values: &FeatureVector) -> Result<(), ValidationError> {
    for (feature, v) in values.iter() {
        if !v.is_finite() {
            return Err(ValidationError::NonFinite(feature.name()));
        }
    }
    Ok(())
}

/// Build a reading from raw column text (`timestamp` plus one field per
/// feature in `Feature::ALL` order).
pub fn parse_row(
    timestamp: Option<&str>,
    fields: [Option<&str>; FEATURE_COUNT],
) -> Result<Reading, ValidationError> {
    let timestamp = parse_timestamp(timestamp.ok_or(ValidationError::MissingColumn("Timestamp"))?)?;
    let mut values = [0.0; FEATURE_COUNT];
    for (slot, (feature, raw)) in values.iter_mut().zip(Feature::ALL.iter().zip(fields)) {
        let raw = raw.ok_or(ValidationError::MissingColumn(feature.name()))?.trim();
        *slot = raw.parse::<f64>().map_err(|_| ValidationError::NonNumeric {
            feature: feature.name(),
            raw: raw.to_string(),
        })?;
    }
    let values = FeatureVector(values);
    validate_features(&values)?;
    Ok(Reading::new(timestamp, values))
}
