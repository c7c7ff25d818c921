//! Layered settings: compiled defaults, then an optional TOML file, then
//! `CONTAM_`-prefixed environment variables (`__` separates sections).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::DEFAULT_TRAINING_ROWS;
use crate::forecaster::ForecasterConfig;
use crate::stream::StreamConfig;
use crate::thresholds::ThresholdConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("cannot render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub path: PathBuf,
    pub training_rows: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/dataset.csv"),
            training_rows: DEFAULT_TRAINING_ROWS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dataset: DatasetConfig,
    pub model: ForecasterConfig,
    pub thresholds: ThresholdConfig,
    pub stream: StreamConfig,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Settings::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CONTAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        Self::finish(builder)
    }

    /// Defaults overlaid with an inline TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?)
            .add_source(config::File::from_str(toml, config::FileFormat::Toml));
        Self::finish(builder)
    }

    fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self, ConfigError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.model;
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if m.window == 0 || m.horizon == 0 {
            return invalid("model.window and model.horizon must be non-zero");
        }
        if m.hidden_sizes.len() != 2 || m.hidden_sizes.contains(&0) {
            return invalid("model.hidden_sizes must list two non-zero sizes");
        }
        if !(0.0..1.0).contains(&m.dropout) {
            return invalid("model.dropout must be in [0, 1)");
        }
        if !(0.0..1.0).contains(&m.validation_split) {
            return invalid("model.validation_split must be in [0, 1)");
        }
        if m.epochs == 0 || m.batch_size == 0 {
            return invalid("model.epochs and model.batch_size must be non-zero");
        }
        if m.step_secs <= 0 {
            return invalid("model.step_secs must be positive");
        }
        if self.stream.period_ms == 0 {
            return invalid("stream.period_ms must be non-zero");
        }
        Ok(())
    }
}
