// src/metrics.rs

//! Observability events and a sink that never blocks the engine.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::types::UnitType;

pub const DEFAULT_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum MetricsEvent {
    PackageStarted { unit: UnitType },
    PackageCompleted { unit: UnitType },
    PackageFailed { unit: UnitType },
    PackageRejected { unit: UnitType },
    JobCompleted { link: String, script: String },
    JobFailed { link: String, script: String },
    TaskDuration { script: String, seconds: f64 },
}

/// Consumer of metrics events. Runs on its own task.
pub trait MetricsSink: Send + 'static {
    fn record(&mut self, event: MetricsEvent);
}

/// Writes every event through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn record(&mut self, event: MetricsEvent) {
        match event {
            MetricsEvent::TaskDuration { script, seconds } => {
                debug!(target: "ingestflow::metrics", %script, seconds, "task duration")
            }
            other => info!(target: "ingestflow::metrics", event = ?other, "metric"),
        }
    }
}

/// Cheap handle used by the engine to emit events.
#[derive(Debug, Clone, Default)]
pub struct MetricsSender {
    tx: Option<mpsc::Sender<MetricsEvent>>,
}

impl MetricsSender {
    /// A sender that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Never blocks. Full or closed channels drop the event.
    pub fn emit(&self, event: MetricsEvent) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => debug!(?event, "metrics buffer full; dropping event"),
            Err(TrySendError::Closed(event)) => debug!(?event, "metrics sink gone; dropping event"),
        }
    }
}

/// Spawn `sink` behind a bounded channel of `buffer` events.
pub fn spawn_metrics_sink(
    mut sink: Box<dyn MetricsSink>,
    buffer: usize,
) -> (MetricsSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(buffer.max(1));
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            sink.record(event);
        }
        debug!("metrics sink stopped");
    });
    (MetricsSender { tx: Some(tx) }, handle)
}
