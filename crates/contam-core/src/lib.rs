//! Contaminant monitoring core: dataset replay, normalization, sequence
//! forecasting, threshold alerting and the fixed-period streaming loop.

pub mod domain;
pub mod validation;
pub mod dataset;
pub mod scaler;
pub mod forecaster;
pub mod thresholds;
pub mod analysis;
pub mod messages;
pub mod broadcast;
pub mod config;
pub mod stream;
pub mod pipeline;

pub use domain::*;
pub use validation::*;
pub use dataset::*;
pub use scaler::*;
pub use forecaster::*;
pub use thresholds::*;
pub use analysis::*;
pub use messages::*;
pub use broadcast::*;
pub use crate::config::*;
pub use stream::*;
pub use pipeline::*;
