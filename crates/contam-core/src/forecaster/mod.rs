//! Sequence-to-sequence forecaster: maps the last `W` normalized readings
//! to `P` future readings. Trained once at startup; weights are frozen
//! afterwards.

mod network;

use candle_core::Tensor;
use candle_nn::loss::mse;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use chrono::Duration;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Feature, FeatureVector, ForecastPoint, Reading, FEATURE_COUNT};
use crate::scaler::FeatureScaler;

use network::Network;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingError {
    #[error("insufficient data for training: need at least {needed} readings, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("training data yields no supervised examples")]
    NoExamples,
    #[error("forecaster is already trained")]
    AlreadyTrained,
    #[error("invalid network architecture: {0}")]
    InvalidArchitecture(String),
    #[error("training diverged at epoch {epoch}")]
    Diverged { epoch: usize },
    #[error("model error: {0}")]
    Model(String),
}

impl From<candle_core::Error> for TrainingError {
    fn from(e: candle_core::Error) -> Self {
        TrainingError::Model(e.to_string())
    }
}

/// Internal inference failure; surfaced to callers as "no prediction".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictionError {
    #[error("model produced {got} outputs, expected {expected}")]
    ShapeMismatch { expected: usize, got: usize },
    #[error("model produced a non-finite output")]
    NonFinite,
    #[error("forecast timestamp out of range")]
    TimestampOverflow,
    #[error("model error: {0}")]
    Model(String),
}

impl From<candle_core::Error> for PredictionError {
    fn from(e: candle_core::Error) -> Self {
        PredictionError::Model(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecasterConfig {
    /// Historical window `W`.
    pub window: usize,
    /// Prediction horizon `P`.
    pub horizon: usize,
    pub hidden_sizes: Vec<usize>,
    pub dropout: f64,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f64,
    pub seed: u64,
    /// Spacing between forecast points.
    pub step_secs: i64,
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self {
            window: 30,
            horizon: 10,
            hidden_sizes: vec![64, 32],
            dropout: 0.2,
            learning_rate: 0.001,
            epochs: 50,
            batch_size: 32,
            validation_split: 0.2,
            seed: 42,
            step_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub train_examples: usize,
    pub validation_examples: usize,
    pub epochs: usize,
    pub final_loss: f64,
    pub final_val_loss: Option<f64>,
}

/// Train/predict capability the orchestrator depends on.
pub trait Forecaster {
    fn window(&self) -> usize;

    fn horizon(&self) -> usize;

    fn is_ready(&self) -> bool;

    fn train(&mut self, data: &[Reading]) -> Result<TrainingReport, TrainingError>;

    /// `None` when not ready, when `history` is shorter than the window,
    /// or when inference fails.
    fn predict(&self, history: &[Reading]) -> Option<Vec<ForecastPoint>>;
}

/// One supervised example, flattened row-major: `W x features` in,
/// `P x features` out.
struct Example {
    inputs: Vec<f32>,
    target: Vec<f32>,
}

/// Stack examples into `(batch, W, features)` inputs and `(batch, P * features)` targets.
fn batch_tensors<'a>(
    examples: impl ExactSizeIterator<Item = &'a Example>,
    window: usize,
    network: &Network,
) -> candle_core::Result<(Tensor, Tensor)> {
    let len = examples.len();
    let mut inputs = Vec::with_capacity(len * window * FEATURE_COUNT);
    let mut targets = Vec::with_capacity(len * network.output_len());
    for example in examples {
        inputs.extend_from_slice(&example.inputs);
        targets.extend_from_slice(&example.target);
    }
    let xs = Tensor::from_vec(inputs, (len, window, FEATURE_COUNT), network.device())?;
    let ys = Tensor::from_vec(targets, (len, network.output_len()), network.device())?;
    Ok((xs, ys))
}

struct TrainedModel {
    network: Network,
    scaler: FeatureScaler,
}

pub struct SequenceForecaster {
    cfg: ForecasterConfig,
    model: Option<TrainedModel>,
}

impl SequenceForecaster {
    pub fn new(cfg: ForecasterConfig) -> Self {
        Self { cfg, model: None }
    }

    pub fn config(&self) -> &ForecasterConfig {
        &self.cfg
    }

    pub fn scaler(&self) -> Option<&FeatureScaler> {
        self.model.as_ref().map(|m| &m.scaler)
    }

    fn hidden_sizes(&self) -> Result<[usize; 2], TrainingError> {
        match self.cfg.hidden_sizes.as_slice() {
            &[a, b] if a > 0 && b > 0 => Ok([a, b]),
            other => Err(TrainingError::InvalidArchitecture(format!(
                "expected two non-zero hidden sizes, got {other:?}"
            ))),
        }
    }

    /// Overlapping supervised examples: for each `i` in `[W, N - P)`, the
    /// scaled window `[i - W, i)` predicts the flattened values `[i, i + P)`.
    fn build_examples(&self, data: &[Reading], scaler: &FeatureScaler) -> Vec<Example> {
        let (w, p) = (self.cfg.window, self.cfg.horizon);
        let scaled: Vec<FeatureVector> = data.iter().map(|r| scaler.scale_vector(&r.values)).collect();
        let flatten = |rows: &[FeatureVector]| -> Vec<f32> {
            rows.iter().flat_map(|v| v.0.map(|x| x as f32)).collect()
        };

        (w..data.len().saturating_sub(p))
            .map(|i| Example {
                inputs: flatten(&scaled[i - w..i]),
                target: flatten(&scaled[i..i + p]),
            })
            .collect()
    }

    fn try_predict(&self, model: &TrainedModel, window: &[Reading]) -> Result<Vec<ForecastPoint>, PredictionError> {
        let inputs: Vec<f32> = window
            .iter()
            .flat_map(|r| model.scaler.scale_vector(&r.values).0.map(|x| x as f32))
            .collect();
        let xs = Tensor::from_vec(inputs, (1, window.len(), FEATURE_COUNT), model.network.device())?;
        let output: Vec<f64> = model
            .network
            .forward(&xs, false)?
            .flatten_all()?
            .to_vec1::<f32>()?
            .into_iter()
            .map(f64::from)
            .collect();

        let expected = self.cfg.horizon * FEATURE_COUNT;
        if output.len() != expected {
            return Err(PredictionError::ShapeMismatch { expected, got: output.len() });
        }
        if output.iter().any(|v| !v.is_finite()) {
            return Err(PredictionError::NonFinite);
        }

        let last = window.last().map(|r| r.timestamp).ok_or(PredictionError::TimestampOverflow)?;
        (0..self.cfg.horizon)
            .map(|step| {
                let offset = Duration::try_seconds(self.cfg.step_secs * (step as i64 + 1))
                    .ok_or(PredictionError::TimestampOverflow)?;
                let timestamp = last.checked_add_signed(offset).ok_or(PredictionError::TimestampOverflow)?;
                let values = FeatureVector(std::array::from_fn(|j| {
                    model.scaler.inverse_scale(output[step * FEATURE_COUNT + j], Feature::ALL[j])
                }));
                Ok(ForecastPoint { timestamp, values })
            })
            .collect()
    }
}

impl Forecaster for SequenceForecaster {
    fn window(&self) -> usize {
        self.cfg.window
    }

    fn horizon(&self) -> usize {
        self.cfg.horizon
    }

    fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    fn train(&mut self, data: &[Reading]) -> Result<TrainingReport, TrainingError> {
        if self.model.is_some() {
            return Err(TrainingError::AlreadyTrained);
        }
        let needed = self.cfg.window + self.cfg.horizon;
        if data.len() < needed {
            return Err(TrainingError::InsufficientData { needed, got: data.len() });
        }
        let hidden = self.hidden_sizes()?;

        info!("starting model training on {} readings", data.len());
        let scaler = FeatureScaler::fit(data).ok_or(TrainingError::NoExamples)?;
        let examples = self.build_examples(data, &scaler);
        if examples.is_empty() {
            return Err(TrainingError::NoExamples);
        }

        // Trailing fraction is held out for validation.
        let train_len = ((examples.len() as f64) * (1.0 - self.cfg.validation_split)).floor() as usize;
        let (train, validation) = examples.split_at(train_len.clamp(1, examples.len()));

        let mut rng = StdRng::seed_from_u64(self.cfg.seed);
        let network = Network::new(
            FEATURE_COUNT,
            hidden,
            self.cfg.horizon * FEATURE_COUNT,
            self.cfg.dropout,
            &mut rng,
        )?;
        // Plain Adam: decoupled weight decay switched off.
        let mut optimizer = AdamW::new(
            network.vars(),
            ParamsAdamW {
                lr: self.cfg.learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;
        let mut order: Vec<usize> = (0..train.len()).collect();
        let batch_size = self.cfg.batch_size.max(1);
        let w = self.cfg.window;

        let mut final_loss = f64::NAN;
        let mut final_val_loss = None;
        for epoch in 0..self.cfg.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;
            for batch in order.chunks(batch_size) {
                let (xs, ys) = batch_tensors(batch.iter().map(|&idx| &train[idx]), w, &network)?;
                let loss = mse(&network.forward(&xs, true)?, &ys)?;
                optimizer.backward_step(&loss)?;
                epoch_loss += f64::from(loss.to_scalar::<f32>()?) * batch.len() as f64;
            }

            final_loss = epoch_loss / train.len() as f64;
            if !final_loss.is_finite() {
                return Err(TrainingError::Diverged { epoch: epoch + 1 });
            }
            final_val_loss = if validation.is_empty() {
                None
            } else {
                let (xs, ys) = batch_tensors(validation.iter(), w, &network)?;
                let loss = mse(&network.forward(&xs, false)?, &ys)?;
                Some(f64::from(loss.to_scalar::<f32>()?))
            };
            match final_val_loss {
                Some(val) => debug!("epoch {}: loss = {:.4}, val_loss = {:.4}", epoch + 1, final_loss, val),
                None => debug!("epoch {}: loss = {:.4}", epoch + 1, final_loss),
            }
        }

        info!(
            "model training completed: {} epochs, {} train / {} validation examples, loss {:.4}",
            self.cfg.epochs,
            train.len(),
            validation.len(),
            final_loss
        );
        self.model = Some(TrainedModel { network, scaler });

        Ok(TrainingReport {
            train_examples: train.len(),
            validation_examples: validation.len(),
            epochs: self.cfg.epochs,
            final_loss,
            final_val_loss,
        })
    }

    fn predict(&self, history: &[Reading]) -> Option<Vec<ForecastPoint>> {
        let model = self.model.as_ref()?;
        let w = self.cfg.window;
        if history.len() < w {
            return None;
        }
        // Input and activation tensors are owned by this call and freed on return.
        match self.try_predict(model, &history[history.len() - w..]) {
            Ok(points) => Some(points),
            Err(e) => {
                warn!("prediction error: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn series(n: usize) -> Vec<Reading> {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap().and_hms_opt(6, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let t = i as f64 / 6.0;
                Reading::new(
                    start + Duration::minutes(i as i64),
                    FeatureVector::new(0.6 + 0.3 * t.sin(), 0.4 + 0.2 * t.cos(), 18.0 + 5.0 * (t / 2.0).sin()),
                )
            })
            .collect()
    }

    fn small_config() -> ForecasterConfig {
        ForecasterConfig {
            window: 10,
            horizon: 4,
            hidden_sizes: vec![8, 4],
            epochs: 5,
            batch_size: 8,
            ..ForecasterConfig::default()
        }
    }

    #[test]
    fn predict_before_training_is_none() {
        let f = SequenceForecaster::new(small_config());
        assert!(!f.is_ready());
        assert!(f.predict(&series(20)).is_none());
    }

    #[test]
    fn rejects_short_training_data() {
        let mut f = SequenceForecaster::new(small_config());
        let err = f.train(&series(13)).unwrap_err();
        assert_eq!(err, TrainingError::InsufficientData { needed: 14, got: 13 });
        assert!(!f.is_ready());
    }

    #[test]
    fn exact_window_plus_horizon_has_no_examples() {
        let mut f = SequenceForecaster::new(small_config());
        assert_eq!(f.train(&series(14)).unwrap_err(), TrainingError::NoExamples);
    }

    #[test]
    fn rejects_bad_architecture() {
        let mut f = SequenceForecaster::new(ForecasterConfig { hidden_sizes: vec![8], ..small_config() });
        assert!(matches!(f.train(&series(40)), Err(TrainingError::InvalidArchitecture(_))));
    }

    #[test]
    fn trains_once_and_forecasts_horizon() {
        let data = series(40);
        let mut f = SequenceForecaster::new(small_config());
        let report = f.train(&data).unwrap();
        // 40 - 10 - 4 = 26 examples, trailing 20% held out
        assert_eq!(report.train_examples, 20);
        assert_eq!(report.validation_examples, 6);
        assert!(report.final_loss.is_finite());
        assert!(f.is_ready());
        assert_eq!(f.train(&data), Err(TrainingError::AlreadyTrained));

        let points = f.predict(&data).unwrap();
        assert_eq!(points.len(), 4);
        let last = data.last().unwrap().timestamp;
        for (i, p) in points.iter().enumerate() {
            assert_eq!(p.timestamp, last + Duration::minutes(i as i64 + 1));
            assert!(p.values.0.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn predict_needs_full_window() {
        let data = series(40);
        let mut f = SequenceForecaster::new(small_config());
        f.train(&data).unwrap();
        assert!(f.predict(&data[..9]).is_none());
        assert!(f.predict(&data[..10]).is_some());
    }

    #[test]
    fn training_without_dropout_is_deterministic_for_a_seed() {
        let data = series(40);
        let cfg = ForecasterConfig { dropout: 0.0, ..small_config() };
        let mut a = SequenceForecaster::new(cfg.clone());
        let mut b = SequenceForecaster::new(cfg);
        let (ra, rb) = (a.train(&data).unwrap(), b.train(&data).unwrap());
        assert!((ra.final_loss - rb.final_loss).abs() < 1e-9);

        let (pa, pb) = (a.predict(&data).unwrap(), b.predict(&data).unwrap());
        for (x, y) in pa.iter().zip(&pb) {
            assert_eq!(x.timestamp, y.timestamp);
            for f in Feature::ALL {
                assert!((x.values.get(f) - y.values.get(f)).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn training_reduces_loss() {
        let data = series(60);
        let short = ForecasterConfig { epochs: 1, learning_rate: 0.01, dropout: 0.0, ..small_config() };
        let long = ForecasterConfig { epochs: 40, learning_rate: 0.01, dropout: 0.0, ..small_config() };
        let first = SequenceForecaster::new(short).train(&data).unwrap().final_loss;
        let last = SequenceForecaster::new(long).train(&data).unwrap().final_loss;
        assert!(last < first, "loss {first} -> {last}");
    }
}
