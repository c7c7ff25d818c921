use log::info;
use thiserror::Error;

use crate::analysis::{AnalysisError, AnalysisOrchestrator};
use crate::broadcast::Publisher;
use crate::config::{ConfigError, Settings};
use crate::dataset::{DataSource, DatasetCursor, LoadError};
use crate::forecaster::{Forecaster, SequenceForecaster};

/// Fatal startup failures. No partially-ready context is ever returned.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

/// Everything a tick touches, built once at startup and handed to the
/// streaming loop.
pub struct PipelineContext<S, F, P> {
    pub source: S,
    pub orchestrator: AnalysisOrchestrator<F>,
    pub publisher: P,
}

impl<P: Publisher> PipelineContext<DatasetCursor, SequenceForecaster, P> {
    /// Load the dataset and train the forecaster on its initial slice.
    pub fn init(settings: &Settings, publisher: P) -> Result<Self, StartupError> {
        settings.validate()?;
        let mut source =
            DatasetCursor::new(settings.model.window).with_training_rows(settings.dataset.training_rows);
        source.load(&settings.dataset.path)?;

        let forecaster = SequenceForecaster::new(settings.model.clone());
        let orchestrator = AnalysisOrchestrator::new(forecaster, settings.thresholds.clone());
        Self::from_parts(source, orchestrator, publisher)
    }
}

impl<S, F, P> PipelineContext<S, F, P>
where
    S: DataSource,
    F: Forecaster,
    P: Publisher,
{
    /// Assemble from already-built collaborators, initializing the
    /// orchestrator if it is not ready yet.
    pub fn from_parts(
        source: S,
        mut orchestrator: AnalysisOrchestrator<F>,
        publisher: P,
    ) -> Result<Self, StartupError> {
        orchestrator.initialize(&source)?;
        publisher.update_snapshot(source.current_window().last());
        info!("pipeline ready with {} readings", source.len());
        Ok(Self { source, orchestrator, publisher })
    }

    /// Release subscribers. Component state is dropped with the context.
    pub fn teardown(self) {
        self.publisher.close();
    }
}
