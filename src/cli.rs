use crate::coordinator::CoordinatorConfig;
use crate::reporter::ReporterConfig;
use crate::results::ClientType;
use crate::services::SimulationProfile;
use crate::suite::{SttTestConfig, SuitePreset, TestSuiteDefinition};
use crate::utils::{validate_endpoint, validate_interval};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Voice Latency Harness - measure, route and analyze STT -> LLM -> TTS pipelines
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Built-in suite to run
    #[clap(short = 's', long, value_enum, default_value_t = SuitePreset::QuickValidation, help_heading = "Suite")]
    pub suite: SuitePreset,

    /// JSON suite definition (takes precedence over --suite)
    #[clap(long, help_heading = "Suite")]
    pub suite_file: Option<PathBuf>,

    /// Output file for results (JSON format)
    #[clap(short = 'o', long, default_value = crate::defaults::OUTPUT_FILE, help_heading = "Output")]
    pub output_file: PathBuf,

    /// JSON output file for streaming per-test results during execution
    #[clap(long, help_heading = "Output")]
    pub streaming_output: Option<PathBuf>,

    /// Compare against a stored baseline and flag regressions
    #[clap(long, help_heading = "Output")]
    pub baseline: Option<PathBuf>,

    /// Store this run's medians as a new baseline
    #[clap(long, help_heading = "Output")]
    pub save_baseline: Option<PathBuf>,

    /// Reporting API base URL; results are posted in batches when set
    #[clap(long, help_heading = "Reporting")]
    pub report_endpoint: Option<String>,

    /// Results per outbound batch
    #[clap(long, default_value_t = crate::defaults::REPORT_BATCH_SIZE, help_heading = "Reporting")]
    pub report_batch_size: usize,

    /// Maximum time a result waits before being flushed
    #[clap(long, value_parser = parse_duration, default_value = "2s", help_heading = "Reporting")]
    pub report_interval: Duration,

    /// Health endpoint of the primary STT backend
    #[clap(long, help_heading = "Routing")]
    pub health_url: Option<String>,

    /// STT provider used while the primary is unhealthy
    #[clap(long, default_value = "apple", help_heading = "Routing")]
    pub fallback_stt: String,

    /// Interval between health probes
    #[clap(long, value_parser = parse_duration, default_value = "5s", help_heading = "Routing")]
    pub health_interval: Duration,

    /// Timeout for a single health probe
    #[clap(long, value_parser = parse_duration, default_value = "2s", help_heading = "Routing")]
    pub probe_timeout: Duration,

    /// Probe response time above which the backend counts as degraded
    #[clap(long, value_parser = parse_duration, default_value = "1s", help_heading = "Routing")]
    pub slow_threshold: Duration,

    /// Upper bound for each backend stage of a test
    #[clap(long, value_parser = parse_duration, default_value = "10s", help_heading = "Execution")]
    pub stage_timeout: Duration,

    /// Resource sampling interval
    #[clap(long, value_parser = parse_duration, default_value = "100ms", help_heading = "Execution")]
    pub sample_interval: Duration,

    /// Client identifier recorded in the run
    #[clap(long, default_value = "headless", help_heading = "Execution")]
    pub client_id: String,

    /// Multiplier for simulated provider delays
    #[clap(long, default_value_t = 1.0, help_heading = "Simulation")]
    pub time_scale: f64,

    /// Seed for simulated latency jitter
    #[clap(long, default_value_t = 42, help_heading = "Simulation")]
    pub seed: u64,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,

    /// Also write logs to this file
    #[clap(long)]
    pub log_file: Option<PathBuf>,
}

/// Health-aware STT routing settings
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub health_url: String,
    pub fallback: SttTestConfig,
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub slow_threshold: Duration,
}

/// Outbound reporting settings
#[derive(Debug, Clone)]
pub struct ReportingConfig {
    pub endpoint: String,
    pub reporter: ReporterConfig,
}

/// Validated runtime configuration built from [`Args`]
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub suite: TestSuiteDefinition,
    pub output_file: PathBuf,
    pub streaming_output: Option<PathBuf>,
    pub baseline: Option<PathBuf>,
    pub save_baseline: Option<PathBuf>,
    pub reporting: Option<ReportingConfig>,
    pub routing: Option<RoutingConfig>,
    pub coordinator: CoordinatorConfig,
    pub simulation: SimulationProfile,
}

impl HarnessConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let suite = match &args.suite_file {
            Some(path) => TestSuiteDefinition::from_file(path)
                .with_context(|| format!("Failed to load suite file {:?}", path))?,
            None => args.suite.build(),
        };

        validate_interval("Stage timeout", args.stage_timeout)?;
        validate_interval("Sample interval", args.sample_interval)?;

        let reporting = match &args.report_endpoint {
            Some(endpoint) => {
                validate_endpoint(endpoint)?;
                validate_interval("Report interval", args.report_interval)?;
                if args.report_batch_size == 0 {
                    anyhow::bail!("Report batch size must be at least 1");
                }
                Some(ReportingConfig {
                    endpoint: endpoint.clone(),
                    reporter: ReporterConfig {
                        batch_size: args.report_batch_size,
                        flush_interval: args.report_interval,
                    },
                })
            }
            None => None,
        };

        let routing = match &args.health_url {
            Some(url) => {
                validate_endpoint(url)?;
                validate_interval("Health interval", args.health_interval)?;
                validate_interval("Probe timeout", args.probe_timeout)?;
                Some(RoutingConfig {
                    health_url: url.clone(),
                    fallback: SttTestConfig::new(args.fallback_stt.clone()),
                    interval: args.health_interval,
                    probe_timeout: args.probe_timeout,
                    slow_threshold: args.slow_threshold,
                })
            }
            None => None,
        };

        if !(args.time_scale > 0.0) {
            anyhow::bail!("Time scale must be positive, got {}", args.time_scale);
        }

        Ok(Self {
            suite,
            output_file: args.output_file.clone(),
            streaming_output: args.streaming_output.clone(),
            baseline: args.baseline.clone(),
            save_baseline: args.save_baseline.clone(),
            reporting,
            routing,
            coordinator: CoordinatorConfig {
                client_id: args.client_id.clone(),
                client_type: ClientType::Headless,
                stage_timeout: args.stage_timeout,
                sample_interval: args.sample_interval,
                ..CoordinatorConfig::default()
            },
            simulation: SimulationProfile {
                time_scale: args.time_scale,
                seed: args.seed,
                ..SimulationProfile::default()
            },
        })
    }
}

/// Parse duration from string (e.g., "100ms", "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s")
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() {
        return Err(format!("Duration must be finite: {}", s));
    }
    if num < 0.0 {
        return Err(format!("Duration cannot be negative: {}", s));
    }

    let millis = match unit {
        "ms" => num,
        "s" => num * 1000.0,
        "m" => num * 60_000.0,
        "h" => num * 3_600_000.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(Duration::from_millis(millis.round() as u64))
}
