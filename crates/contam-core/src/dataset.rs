//! Dataset cursor: an immutable, time-sorted reading sequence replayed
//! circularly as a simulated live stream.

use std::io;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, info};
use thiserror::Error;

use crate::domain::{Feature, Reading, FEATURE_COUNT};
use crate::validation::parse_row;

/// Default number of leading readings used to fit the scaler and train.
pub const DEFAULT_TRAINING_ROWS: usize = 60;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("dataset file not found at {0}")]
    NotFound(PathBuf),
    #[error("dataset source has no {0} column")]
    MissingColumn(&'static str),
    #[error("failed to read dataset: {0}")]
    Csv(#[from] csv::Error),
    #[error("no valid data found in dataset")]
    Empty,
}

/// Read capability the analysis and streaming stages depend on.
pub trait DataSource {
    /// Reading at the current position; advances the position circularly.
    fn next_reading(&mut self) -> Option<Reading>;

    /// Up to `W` readings strictly before the current position.
    fn current_window(&self) -> &[Reading];

    /// Leading readings used once for scaler fitting and training.
    fn initial_training_slice(&self) -> &[Reading];

    fn len(&self) -> usize;

    fn position(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct DatasetCursor {
    readings: Vec<Reading>,
    position: usize,
    window: usize,
    training_rows: usize,
}

impl DatasetCursor {
    pub fn new(window: usize) -> Self {
        Self {
            readings: Vec::new(),
            position: 0,
            window,
            training_rows: DEFAULT_TRAINING_ROWS,
        }
    }

    pub fn with_training_rows(mut self, rows: usize) -> Self {
        self.training_rows = rows;
        self
    }

    /// Cursor over already-parsed readings (sorted here).
    pub fn from_readings(mut readings: Vec<Reading>, window: usize) -> Self {
        readings.sort_by_key(|r| r.timestamp);
        Self { readings, ..Self::new(window) }
    }

    /// Load a CSV source with `Timestamp` and one column per feature.
    /// Returns the number of valid rows kept.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<usize, LoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }
        info!("loading dataset from {}", path.display());
        let file = std::fs::File::open(path).map_err(csv::Error::from)?;
        self.load_from_reader(file)
    }

    pub fn load_from_reader<R: io::Read>(&mut self, source: R) -> Result<usize, LoadError> {
        let mut rdr = ReaderBuilder::new().trim(Trim::All).flexible(true).from_reader(source);
        let columns = ColumnIndex::resolve(rdr.headers()?)?;

        let mut readings = Vec::new();
        let mut skipped = 0usize;
        for (line, record) in rdr.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    debug!("skipping malformed row {}: {}", line + 1, e);
                    skipped += 1;
                    continue;
                }
            };
            match columns.parse(&record) {
                Ok(reading) => readings.push(reading),
                Err(e) => {
                    debug!("skipping row {}: {}", line + 1, e);
                    skipped += 1;
                }
            }
        }

        if readings.is_empty() {
            return Err(LoadError::Empty);
        }
        readings.sort_by_key(|r| r.timestamp);
        self.readings = readings;
        self.position = 0;

        info!("loaded {} valid records ({} skipped)", self.readings.len(), skipped);
        if let (Some(first), Some(last)) = (self.readings.first(), self.readings.last()) {
            info!("first record: {:?}", first);
            info!("last record: {:?}", last);
        }
        Ok(self.readings.len())
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn window_size(&self) -> usize {
        self.window
    }
}

impl DataSource for DatasetCursor {
    fn next_reading(&mut self) -> Option<Reading> {
        let reading = *self.readings.get(self.position)?;
        self.position = (self.position + 1) % self.readings.len();
        Some(reading)
    }

    fn current_window(&self) -> &[Reading] {
        let start = self.position.saturating_sub(self.window);
        &self.readings[start..self.position]
    }

    fn initial_training_slice(&self) -> &[Reading] {
        &self.readings[..self.training_rows.min(self.readings.len())]
    }

    fn len(&self) -> usize {
        self.readings.len()
    }

    fn position(&self) -> usize {
        self.position
    }
}

/// Header positions of the columns the cursor reads.
struct ColumnIndex {
    timestamp: usize,
    features: [usize; FEATURE_COUNT],
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord) -> Result<Self, LoadError> {
        let find = |name: &'static str| {
            headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .ok_or(LoadError::MissingColumn(name))
        };
        let timestamp = find("Timestamp")?;
        let mut features = [0; FEATURE_COUNT];
        for (slot, feature) in features.iter_mut().zip(Feature::ALL) {
            *slot = find(feature.name())?;
        }
        Ok(Self { timestamp, features })
    }

    fn parse(&self, record: &StringRecord) -> Result<Reading, crate::validation::ValidationError> {
        parse_row(record.get(self.timestamp), self.features.map(|i| record.get(i)))
    }
}
