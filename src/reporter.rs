//! # Outbound Result Reporting
//!
//! [`ResultReporter`] is a fire-and-forget queue between the coordinator and a
//! reporting backend. `enqueue` only pushes onto a channel; a background worker
//! owns the buffer and flushes it as one batch per run when either trigger
//! fires:
//!
//! - the buffer reaches `batch_size` results (default 10);
//! - `flush_interval` elapses (default 2 s).
//!
//! Failed deliveries are logged and dropped, never retried. `stop` drains the
//! queue and makes one final flush attempt.
//!
//! ## Wire Format
//!
//! `POST {endpoint}/runs/{runId}/results` with body `{"results": [TestResult, ...]}`.

use crate::error::{HarnessError, Result};
use crate::results::TestResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Destination for result batches
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn send_batch(&self, run_id: &str, results: &[TestResult]) -> Result<()>;
}

#[derive(Serialize)]
struct BatchBody<'a> {
    results: &'a [TestResult],
}

/// Posts batches to the reporting HTTP API
pub struct HttpReportSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReportSink {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn batch_url(&self, run_id: &str) -> String {
        format!("{}/runs/{}/results", self.base_url, run_id)
    }
}

#[async_trait]
impl ReportSink for HttpReportSink {
    async fn send_batch(&self, run_id: &str, results: &[TestResult]) -> Result<()> {
        let url = self.batch_url(run_id);
        let response = self
            .client
            .post(&url)
            .json(&BatchBody { results })
            .send()
            .await
            .map_err(|e| HarnessError::Reporting {
                endpoint: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarnessError::Reporting {
                endpoint: url,
                message: format!("server returned {}", status),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReporterConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::defaults::REPORT_BATCH_SIZE,
            flush_interval: crate::defaults::REPORT_FLUSH_INTERVAL,
        }
    }
}

/// Delivery counters
#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    delivered: AtomicUsize,
    dropped: AtomicUsize,
}

struct Queued {
    run_id: String,
    result: TestResult,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Non-blocking batch reporter
pub struct ResultReporter {
    tx: mpsc::UnboundedSender<Queued>,
    counters: Arc<Counters>,
    worker: Mutex<Option<Worker>>,
}

impl ResultReporter {
    /// Spawn the flush worker. Must be called inside a tokio runtime.
    pub fn start(sink: Arc<dyn ReportSink>, config: ReporterConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let handle = tokio::spawn(flush_loop(
            sink,
            config,
            rx,
            shutdown_rx,
            Arc::clone(&counters),
        ));
        debug!(
            batch_size = config.batch_size,
            interval = ?config.flush_interval,
            "Result reporter started"
        );

        Self {
            tx,
            counters,
            worker: Mutex::new(Some(Worker {
                shutdown: shutdown_tx,
                handle,
            })),
        }
    }

    /// Queue a result for delivery. Never performs I/O.
    pub fn enqueue(&self, run_id: &str, result: TestResult) {
        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        let queued = Queued {
            run_id: run_id.to_string(),
            result,
        };
        if self.tx.send(queued).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::AcqRel);
            self.counters.dropped.fetch_add(1, Ordering::AcqRel);
            warn!(run_id, "Reporter stopped; dropping result");
        }
    }

    /// Results queued or buffered but not yet attempted
    pub fn pending(&self) -> usize {
        self.counters.pending.load(Ordering::Acquire)
    }

    pub fn delivered(&self) -> usize {
        self.counters.delivered.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> usize {
        self.counters.dropped.load(Ordering::Acquire)
    }

    /// Drain the queue, flush once more and stop the worker. Idempotent.
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };
        let _ = worker.shutdown.send(true);
        if let Err(e) = worker.handle.await {
            warn!("Reporter worker ended abnormally: {}", e);
        }
        info!(
            delivered = self.delivered(),
            dropped = self.dropped(),
            "Result reporter stopped"
        );
    }
}

async fn flush_loop(
    sink: Arc<dyn ReportSink>,
    config: ReporterConfig,
    mut rx: mpsc::UnboundedReceiver<Queued>,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<Counters>,
) {
    let batch_size = config.batch_size.max(1);
    let mut buffer: Vec<Queued> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            item = rx.recv() => match item {
                Some(queued) => {
                    buffer.push(queued);
                    if buffer.len() >= batch_size {
                        flush(sink.as_ref(), &mut buffer, &counters).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(sink.as_ref(), &mut buffer, &counters).await;
                }
            }
        }
    }

    // One final attempt covering everything still queued
    rx.close();
    while let Some(queued) = rx.recv().await {
        buffer.push(queued);
    }
    if !buffer.is_empty() {
        debug!(count = buffer.len(), "Final reporter flush");
        flush(sink.as_ref(), &mut buffer, &counters).await;
    }
}

/// Send everything buffered, one batch per run
async fn flush(sink: &dyn ReportSink, buffer: &mut Vec<Queued>, counters: &Counters) {
    let mut by_run: BTreeMap<String, Vec<TestResult>> = BTreeMap::new();
    for queued in buffer.drain(..) {
        by_run.entry(queued.run_id).or_default().push(queued.result);
    }

    for (run_id, results) in by_run {
        let count = results.len();
        match sink.send_batch(&run_id, &results).await {
            Ok(()) => {
                debug!(run_id = %run_id, count, "Reported result batch");
                counters.delivered.fetch_add(count, Ordering::AcqRel);
            }
            Err(e) => {
                warn!(run_id = %run_id, count, "Dropping result batch: {}", e);
                counters.dropped.fetch_add(count, Ordering::AcqRel);
            }
        }
        counters.pending.fetch_sub(count, Ordering::AcqRel);
    }
}
