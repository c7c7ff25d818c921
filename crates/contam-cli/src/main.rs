use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use contam_core::{
    check_thresholds, BroadcastHub, DataSource, DatasetCursor, Forecaster, PipelineContext, SequenceForecaster,
    Settings, StreamLoop,
};
use contam_projectors::project_message;
use log::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "contam", version, about = "Contaminant forecasting and alerting stream")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Args)]
struct Common {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Dataset CSV, overriding the configured path
    #[arg(long)]
    dataset: Option<PathBuf>,
}

impl Common {
    fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref()).context("loading configuration")?;
        if let Some(path) = &self.dataset {
            settings.dataset.path = path.clone();
        }
        Ok(settings)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Train, then stream analysis results as JSON lines on stdout
    Run {
        #[command(flatten)]
        common: Common,
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
        /// Tick period in milliseconds
        #[arg(long)]
        period_ms: Option<u64>,
        /// Also append persistence records (JSON lines) to this file
        #[arg(long)]
        records_out: Option<PathBuf>,
    },
    /// Load the dataset and report what was kept
    Check {
        #[command(flatten)]
        common: Common,
    },
    /// Train once and forecast from the first window of the dataset
    Forecast {
        #[command(flatten)]
        common: Common,
    },
    /// Print the effective configuration as TOML
    Config {
        #[command(flatten)]
        common: Common,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Run { common, ticks, period_ms, records_out } => {
            let mut settings = common.settings()?;
            if ticks.is_some() {
                settings.stream.max_ticks = ticks;
            }
            if let Some(ms) = period_ms {
                settings.stream.period_ms = ms;
            }
            run(&settings, records_out)
        }
        Commands::Check { common } => check(&common.settings()?),
        Commands::Forecast { common } => forecast(&common.settings()?),
        Commands::Config { common } => {
            print!("{}", common.settings()?.to_toml()?);
            Ok(())
        }
    }
}

fn run(settings: &Settings, records_out: Option<PathBuf>) -> Result<()> {
    let hub = BroadcastHub::new(settings.stream.subscriber_capacity);
    let messages = hub.subscribe();
    let context = PipelineContext::init(settings, hub).context("starting pipeline")?;
    let handle = StreamLoop::new(context, &settings.stream).spawn();

    let mut records = match records_out {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            Some(BufWriter::new(file))
        }
        None => None,
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for message in messages.iter() {
        serde_json::to_writer(&mut out, &message)?;
        writeln!(out)?;
        out.flush()?;
        if let (Some(writer), Some(record)) = (records.as_mut(), project_message(&message)) {
            serde_json::to_writer(&mut *writer, &record)?;
            writeln!(writer)?;
            writer.flush()?;
        }
    }

    let summary = handle.join()?;
    info!("stream finished: {} ticks, {} failed", summary.ticks, summary.failed_ticks);
    Ok(())
}

fn check(settings: &Settings) -> Result<()> {
    let mut cursor = DatasetCursor::new(settings.model.window).with_training_rows(settings.dataset.training_rows);
    let count = cursor.load(&settings.dataset.path)?;
    let readings = cursor.readings();
    let report = serde_json::json!({
        "validReadings": count,
        "first": readings.first(),
        "last": readings.last(),
        "trainingRows": cursor.initial_training_slice().len(),
        "enoughForTraining": cursor.initial_training_slice().len() > settings.model.window + settings.model.horizon,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn forecast(settings: &Settings) -> Result<()> {
    let mut cursor = DatasetCursor::new(settings.model.window).with_training_rows(settings.dataset.training_rows);
    cursor.load(&settings.dataset.path)?;

    let mut forecaster = SequenceForecaster::new(settings.model.clone());
    let report = forecaster.train(cursor.initial_training_slice())?;
    info!("training loss {:.4}, validation loss {:?}", report.final_loss, report.final_val_loss);

    let readings = cursor.readings();
    let window = &readings[..settings.model.window.min(readings.len())];
    let predictions = forecaster.predict(window);
    let alerts = predictions.as_deref().map(|points| check_thresholds(points, &settings.thresholds));
    let output = serde_json::json!({
        "lastObserved": window.last(),
        "predictions": predictions,
        "alerts": alerts,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
