//! # Backend Health Monitoring
//!
//! A [`HealthMonitor`] probes one backend on a fixed interval and publishes
//! the result two ways:
//!
//! - a stream of **transitions**, yielding a status only when it differs from
//!   the previous one (the monitor assumes `Healthy` before the first probe);
//! - a `watch` channel holding the latest status, which routers read when a
//!   new session starts.
//!
//! Probe failures never surface as errors. Connection failures and timeouts
//! fold into [`HealthStatus::Unhealthy`]; non-2xx responses and slow 2xx
//! responses fold into [`HealthStatus::Degraded`].
//!
//! ## Cancellation
//!
//! [`HealthMonitor::stop_monitoring`] is idempotent. A probe already in flight
//! runs to completion (it is bounded by the probe timeout) and its result is
//! discarded.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Backend health as seen by the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Whether a new session may be routed to this backend
    pub fn is_usable(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// One health check against a backend
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> HealthStatus;

    /// Human-readable target, used in logs
    fn target(&self) -> String;
}

/// HTTP GET probe with a bounded timeout
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: String,
    slow_threshold: Duration,
}

impl HttpHealthProbe {
    /// ## Parameters
    /// - `url`: health endpoint to GET
    /// - `timeout`: whole-request deadline; exceeding it reads as `Unhealthy`
    /// - `slow_threshold`: a 2xx slower than this reads as `Degraded`
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        slow_threshold: Duration,
    ) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            slow_threshold,
        })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> HealthStatus {
        let started = Instant::now();
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => {
                if started.elapsed() > self.slow_threshold {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                }
            }
            Ok(response) => {
                debug!(url = %self.url, status = %response.status(), "Health probe non-2xx");
                HealthStatus::Degraded
            }
            Err(e) => {
                debug!(url = %self.url, "Health probe failed: {}", e);
                HealthStatus::Unhealthy
            }
        }
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}

struct MonitorTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodic prober publishing de-duplicated health transitions
pub struct HealthMonitor {
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
    status_tx: Arc<watch::Sender<HealthStatus>>,
    task: Mutex<Option<MonitorTask>>,
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>, interval: Duration) -> Self {
        let (status_tx, _) = watch::channel(HealthStatus::Healthy);
        Self {
            probe,
            interval,
            status_tx: Arc::new(status_tx),
            task: Mutex::new(None),
        }
    }

    pub fn current_status(&self) -> HealthStatus {
        *self.status_tx.borrow()
    }

    /// Latest-status channel for routers
    pub fn status_receiver(&self) -> watch::Receiver<HealthStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_monitoring(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Start probing and return the transition stream
    ///
    /// Calling this while already monitoring restarts the loop; the previous
    /// stream ends.
    pub fn start_monitoring(&self) -> BoxStream<'static, HealthStatus> {
        self.stop_monitoring();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor_loop(
            Arc::clone(&self.probe),
            self.interval,
            Arc::clone(&self.status_tx),
            events_tx,
            shutdown_rx,
        ));

        info!(backend = %self.probe.target(), interval = ?self.interval, "Health monitoring started");
        *self.task.lock() = Some(MonitorTask {
            shutdown: shutdown_tx,
            handle,
        });

        Box::pin(stream::unfold(events_rx, |mut rx| async move {
            rx.recv().await.map(|status| (status, rx))
        }))
    }

    /// Stop probing. Safe to call repeatedly.
    pub fn stop_monitoring(&self) {
        if let Some(task) = self.task.lock().take() {
            let _ = task.shutdown.send(true);
            debug!(backend = %self.probe.target(), "Health monitoring stopped");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

async fn monitor_loop(
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
    status_tx: Arc<watch::Sender<HealthStatus>>,
    events_tx: mpsc::UnboundedSender<HealthStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let status = probe.probe().await;
        if *shutdown.borrow() {
            debug!("Discarding health probe result after stop");
            break;
        }

        let changed = status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            match status {
                HealthStatus::Unhealthy => warn!(backend = %probe.target(), "Backend unhealthy"),
                _ => info!(backend = %probe.target(), %status, "Backend health changed"),
            }
            let _ = events_tx.send(status);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Probe replaying a script, repeating its last entry
    pub(crate) struct ScriptedHealth {
        script: Vec<HealthStatus>,
        calls: AtomicUsize,
    }

    impl ScriptedHealth {
        pub(crate) fn new(script: Vec<HealthStatus>) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedHealth {
        async fn probe(&self) -> HealthStatus {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let idx = call.min(self.script.len().saturating_sub(1));
            self.script
                .get(idx)
                .copied()
                .unwrap_or(HealthStatus::Healthy)
        }

        fn target(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Serve one canned HTTP response per connection
    async fn canned_server(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status_line
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}/health", addr)
    }

    #[tokio::test]
    async fn test_transitions_are_deduplicated() {
        use HealthStatus::*;
        let probe = ScriptedHealth::new(vec![
            Healthy, Healthy, Degraded, Degraded, Unhealthy, Unhealthy, Healthy,
        ]);
        let monitor = HealthMonitor::new(Arc::new(probe), Duration::from_millis(5));
        let stream = monitor.start_monitoring();

        let events: Vec<_> = stream.take(3).collect().await;
        assert_eq!(events, vec![Degraded, Unhealthy, Healthy]);
        assert_eq!(monitor.current_status(), Healthy);
        monitor.stop_monitoring();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_ends_stream() {
        let probe = ScriptedHealth::new(vec![HealthStatus::Healthy]);
        let monitor = HealthMonitor::new(Arc::new(probe), Duration::from_millis(5));
        let mut stream = monitor.start_monitoring();
        assert!(monitor.is_monitoring());

        monitor.stop_monitoring();
        monitor.stop_monitoring();

        let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap();
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn test_watch_receiver_tracks_latest() {
        let probe = ScriptedHealth::new(vec![HealthStatus::Unhealthy]);
        let monitor = HealthMonitor::new(Arc::new(probe), Duration::from_millis(5));
        let mut rx = monitor.status_receiver();
        let _stream = monitor.start_monitoring();

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*rx.borrow(), HealthStatus::Unhealthy);
        monitor.stop_monitoring();
    }

    #[tokio::test]
    async fn test_http_probe_classification() {
        let timeout = Duration::from_secs(2);
        let slow = Duration::from_secs(1);

        let ok = HttpHealthProbe::new(canned_server("200 OK").await, timeout, slow).unwrap();
        assert_eq!(ok.probe().await, HealthStatus::Healthy);

        let failing =
            HttpHealthProbe::new(canned_server("503 Service Unavailable").await, timeout, slow)
                .unwrap();
        assert_eq!(failing.probe().await, HealthStatus::Degraded);

        // A 2xx slower than the threshold is degraded
        let sluggish =
            HttpHealthProbe::new(canned_server("200 OK").await, timeout, Duration::ZERO).unwrap();
        assert_eq!(sluggish.probe().await, HealthStatus::Degraded);

        let refused =
            HttpHealthProbe::new("http://127.0.0.1:1/health", timeout, slow).unwrap();
        assert_eq!(refused.probe().await, HealthStatus::Unhealthy);
    }
}
