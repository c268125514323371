//! # Voice Latency Harness Library
//!
//! Latency instrumentation, health-aware provider routing and results analysis
//! for speech-to-text -> language model -> text-to-speech voice pipelines.
//!
//! ## What It Measures
//!
//! For every test the harness records, on a monotonic clock:
//!
//! - **STT latency**: end of user audio to final transcript
//! - **LLM TTFB / completion**: request to first token, and to the last token
//! - **TTS TTFB / completion**: request to first audio byte, and to the last
//! - **End-to-end**: end of user input to the first audio byte played back
//!
//! alongside peak CPU, memory and thermal state sampled in the background.
//!
//! ## Architecture Overview
//!
//! - `coordinator`: runs scenarios and suites, wiring services to the collector
//! - `metrics`: per-test accumulator producing a [`TestResult`]
//! - `resources`: background CPU / memory / thermal sampling
//! - `health`: periodic backend probing, de-duplicated status stream
//! - `router`: primary / fallback STT selection at session start
//! - `reporter`: fire-and-forget batched upload of results
//! - `analyzer`: ranking, network projections, regressions, recommendations
//! - `services`: provider contracts plus a seeded in-process simulation
//! - `suite`, `results`: data model and JSON output
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_latency_harness::{
//!     suite::quick_validation_suite, CoordinatorConfig, SimulatedServiceFactory,
//!     SimulationProfile, TestCoordinator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut coordinator = TestCoordinator::new(CoordinatorConfig::default());
//!     coordinator.configure(Arc::new(SimulatedServiceFactory::new(
//!         SimulationProfile::default(),
//!     )));
//!
//!     let run = coordinator.execute_suite(&quick_validation_suite()).await?;
//!     let report = coordinator.analyze(&run);
//!     for line in &report.recommendations {
//!         println!("{}", line);
//!     }
//!     Ok(())
//! }
//! ```

pub mod analyzer;

/// Command-line interface and configuration
///
/// Argument parsing with clap and conversion into a validated
/// [`cli::HarnessConfig`], including human-readable durations ("100ms", "2s").
pub mod cli;

pub mod clock;

/// Scenario and suite orchestration
///
/// Drives each test through transcription, completion and synthesis, records
/// failures as data and publishes progress events.
pub mod coordinator;

pub mod error;

/// Backend health probing
///
/// A cancellable probe loop that folds every probe outcome into a
/// [`health::HealthStatus`] and emits only on change.
pub mod health;

pub mod logging;

/// Per-test metric accumulation
pub mod metrics;

pub mod reporter;

pub mod resources;

/// Result collection, aggregation, and output formatting
///
/// Structured JSON output with run metadata, optional streaming of per-test
/// results, and system information for reproducibility.
pub mod results;

pub mod router;

pub mod services;

pub mod suite;

pub mod utils;

pub use analyzer::{AnalysisReport, Analyzer, PerformanceBaseline};
pub use cli::{Args, HarnessConfig};
pub use coordinator::{CancelHandle, CoordinatorConfig, HarnessEvent, TestCoordinator};
pub use error::{HarnessError, Result};
pub use health::{HealthMonitor, HealthStatus, HttpHealthProbe};
pub use metrics::MetricsCollector;
pub use reporter::{HttpReportSink, ReportSink, ResultReporter};
pub use results::{ResultsManager, RunStatus, TestResult, TestRun};
pub use router::ProviderRouter;
pub use services::{ServiceFactory, SimulatedServiceFactory, SimulationProfile};
pub use suite::{NetworkProfile, TestSuiteDefinition};

/// The current version of the harness
///
/// Recorded in result metadata for reproducibility.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default output file name
    pub const OUTPUT_FILE: &str = "latency_results.json";

    /// Resource sampling interval
    ///
    /// 100 ms keeps the sampler's own CPU cost negligible while still
    /// catching short spikes during a single pipeline stage.
    pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

    /// Upper bound for each backend stage of a test
    pub const STAGE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Audio chunk length streamed to STT, matching typical capture buffers
    pub const AUDIO_CHUNK_MS: u32 = 20;

    /// Results per outbound report batch
    pub const REPORT_BATCH_SIZE: usize = 10;

    /// Maximum time a result waits in the reporter buffer
    pub const REPORT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

    /// Timeout for one outbound report request
    pub const REPORT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Median end-to-end latency a configuration should stay under
    pub const E2E_TARGET_MS: f64 = 500.0;
}
