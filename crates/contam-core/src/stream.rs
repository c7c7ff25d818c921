//! Fixed-period streaming loop: read -> analyze -> publish, once per tick.
//!
//! The loop runs on a single worker thread that owns the pipeline context,
//! so ticks never overlap. The ticker channel holds at most one pending
//! tick; ticks that come due while a slow tick is still running are
//! dropped rather than queued.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{never, select, tick, Receiver, Sender};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::broadcast::{Publisher, DEFAULT_SUBSCRIBER_CAPACITY};
use crate::dataset::DataSource;
use crate::domain::TickMetadata;
use crate::forecaster::Forecaster;
use crate::messages::{ChannelMessage, TickMessage};
use crate::pipeline::PipelineContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub period_ms: u64,
    pub subscriber_capacity: usize,
    /// Stop after this many ticks; run until stopped when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ticks: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            max_ticks: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream worker panicked")]
    WorkerPanicked,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub overruns: u64,
}

pub struct StreamLoop<S, F, P> {
    context: PipelineContext<S, F, P>,
    period: Duration,
    max_ticks: Option<u64>,
    summary: StreamSummary,
}

impl<S, F, P> StreamLoop<S, F, P>
where
    S: DataSource,
    F: Forecaster,
    P: Publisher,
{
    pub fn new(context: PipelineContext<S, F, P>, cfg: &StreamConfig) -> Self {
        Self {
            context,
            period: Duration::from_millis(cfg.period_ms.max(1)),
            max_ticks: cfg.max_ticks,
            summary: StreamSummary::default(),
        }
    }

    pub fn context(&self) -> &PipelineContext<S, F, P> {
        &self.context
    }

    pub fn summary(&self) -> StreamSummary {
        self.summary
    }

    /// Run one tick. `Ok(None)` when the source has no readings.
    pub fn tick(&mut self) -> Result<Option<TickMessage>, AnalysisError> {
        let ctx = &mut self.context;
        let Some(reading) = ctx.source.next_reading() else {
            return Ok(None);
        };
        self.summary.ticks += 1;
        debug!("processing reading #{} at {}", self.summary.ticks, reading.timestamp);

        let result = ctx.orchestrator.process_reading(&ctx.source, &reading)?;
        let message = TickMessage {
            result,
            metadata: TickMetadata {
                tick_count: self.summary.ticks,
                total_readings: ctx.source.len(),
                cursor_position: ctx.source.position(),
            },
        };
        ctx.publisher.update_snapshot(ctx.source.current_window().last());
        ctx.publisher.broadcast(&ChannelMessage::Tick(message.clone()));
        Ok(Some(message))
    }

    /// Drive ticks until `stop` fires or disconnects, or `max_ticks` is
    /// reached. A failed tick is logged and the loop carries on.
    pub fn run(mut self, stop: &Receiver<()>) -> StreamSummary {
        let ticker = tick(self.period);
        info!("real-time processing started, period {:?}", self.period);
        while !self.limit_reached() {
            select! {
                recv(stop) -> _ => break,
                recv(ticker) -> _ => {
                    let started = Instant::now();
                    if let Err(e) = self.tick() {
                        self.summary.failed_ticks += 1;
                        error!("error processing reading: {}", e);
                    }
                    let elapsed = started.elapsed();
                    if elapsed > self.period {
                        self.summary.overruns += 1;
                        warn!("tick took {:?}, longer than the {:?} period; overdue ticks skipped", elapsed, self.period);
                    }
                }
            }
        }
        self.shutdown()
    }

    /// Run without an external stop signal (until `max_ticks`, if set).
    pub fn run_to_completion(self) -> StreamSummary {
        self.run(&never())
    }

    fn limit_reached(&self) -> bool {
        self.max_ticks.is_some_and(|max| self.summary.ticks >= max)
    }

    fn shutdown(self) -> StreamSummary {
        let summary = self.summary;
        info!(
            "real-time processing stopped after {} ticks ({} failed, {} overruns)",
            summary.ticks, summary.failed_ticks, summary.overruns
        );
        self.context.teardown();
        summary
    }
}

impl<S, F, P> StreamLoop<S, F, P>
where
    S: DataSource + Send + 'static,
    F: Forecaster + Send + 'static,
    P: Publisher + Send + 'static,
{
    /// Move the loop onto its own worker thread.
    pub fn spawn(self) -> StreamHandle {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let worker = thread::spawn(move || self.run(&stop_rx));
        StreamHandle { stop_tx, worker }
    }
}

pub struct StreamHandle {
    stop_tx: Sender<()>,
    worker: JoinHandle<StreamSummary>,
}

impl StreamHandle {
    /// Signal the worker to stop after its current tick and wait for it.
    pub fn stop(self) -> Result<StreamSummary, StreamError> {
        let _ = self.stop_tx.try_send(());
        self.join()
    }

    /// Wait for the worker to finish on its own (`max_ticks`).
    pub fn join(self) -> Result<StreamSummary, StreamError> {
        let StreamHandle { stop_tx, worker } = self;
        let summary = worker.join().map_err(|_| StreamError::WorkerPanicked);
        drop(stop_tx);
        summary
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}
