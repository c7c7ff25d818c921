//! Analysis orchestrator: composes the data source window, forecaster and
//! threshold evaluator into one `TickResult` per reading.

use log::{error, info};
use thiserror::Error;

use crate::dataset::DataSource;
use crate::domain::{AlertSet, Reading, TickResult};
use crate::forecaster::{Forecaster, TrainingError, TrainingReport};
use crate::thresholds::{check_thresholds, ThresholdConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    Uninitialized,
    Initializing,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("analysis service not initialized")]
    NotInitialized,
    #[error("initialization failed: {0}")]
    Training(#[from] TrainingError),
}

pub struct AnalysisOrchestrator<F> {
    forecaster: F,
    thresholds: ThresholdConfig,
    state: AnalysisState,
}

impl<F: Forecaster> AnalysisOrchestrator<F> {
    pub fn new(forecaster: F, thresholds: ThresholdConfig) -> Self {
        Self {
            forecaster,
            thresholds,
            state: AnalysisState::Uninitialized,
        }
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    pub fn forecaster(&self) -> &F {
        &self.forecaster
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Fit the scaler and train the forecaster on the source's initial
    /// training slice. `Ready` is terminal: calling again is a no-op.
    pub fn initialize<S: DataSource + ?Sized>(&mut self, source: &S) -> Result<Option<TrainingReport>, AnalysisError> {
        if self.state == AnalysisState::Ready {
            return Ok(None);
        }
        self.state = AnalysisState::Initializing;
        match self.forecaster.train(source.initial_training_slice()) {
            Ok(report) => {
                self.state = AnalysisState::Ready;
                info!("analysis service initialized");
                Ok(Some(report))
            }
            Err(e) => {
                self.state = AnalysisState::Uninitialized;
                error!("error initializing analysis service: {}", e);
                Err(e.into())
            }
        }
    }

    /// Analyse `reading` against the source's current window. A window
    /// shorter than `W` yields no forecast and an empty alert set.
    pub fn process_reading<S: DataSource + ?Sized>(
        &self,
        source: &S,
        reading: &Reading,
    ) -> Result<TickResult, AnalysisError> {
        if self.state != AnalysisState::Ready {
            return Err(AnalysisError::NotInitialized);
        }

        let window = source.current_window();
        let predictions = if window.len() >= self.forecaster.window() {
            self.forecaster.predict(window)
        } else {
            None
        };
        let alerts = match &predictions {
            Some(points) => check_thresholds(points, &self.thresholds),
            None => AlertSet::new(),
        };

        Ok(TickResult {
            timestamp: reading.timestamp,
            readings: reading.values,
            predictions,
            alerts,
        })
    }
}
