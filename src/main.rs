//! # Voice Latency Harness - Main Entry Point
//!
//! Runs a test suite against the simulated provider stack and writes the
//! results and analysis to disk.
//!
//! ## Flow
//!
//! 1. **Initialize logging**: colorized console output, optional log file
//! 2. **Parse arguments**: CLI flags into a validated `HarnessConfig`
//! 3. **Wire components**: coordinator, optional reporter, optional health
//!    monitor driving STT fallback
//! 4. **Run the suite**: configurations execute sequentially; Ctrl-C stops
//!    the run after the test in progress
//! 5. **Analyze and output**: summary table, recommendations, JSON results
//!
//! ## Error Handling
//!
//! Individual test failures are recorded in the results and never abort the
//! run. Invalid configuration, unreadable suite files and output failures exit
//! with an error.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use voice_latency_harness::{
    analyzer::AnalysisReport,
    clock::Clock,
    defaults,
    logging::init_logging,
    utils::{
        create_progress_indicator, format_duration, format_latency_ms, format_memory_mb,
        print_table_row, print_table_separator,
    },
    Analyzer, Args, HarnessConfig, HarnessEvent, HealthMonitor, HttpHealthProbe, HttpReportSink,
    PerformanceBaseline, ResultReporter, ResultsManager, SimulatedServiceFactory, TestCoordinator,
    TestRun, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.verbose, args.log_file.as_deref())?;

    info!("Starting Voice Latency Harness v{}", VERSION);
    debug!("Configuration: {:?}", args);

    let config = HarnessConfig::from_args(&args)?;
    Clock::calibrate();

    let mut results_manager = ResultsManager::new(&config.output_file)?;
    if let Some(ref streaming_file) = config.streaming_output {
        info!("Enabling per-test result streaming to: {:?}", streaming_file);
        results_manager.enable_streaming(streaming_file)?;
    }

    let mut coordinator = TestCoordinator::new(config.coordinator.clone());
    coordinator.configure(Arc::new(SimulatedServiceFactory::new(config.simulation)));

    if let Some(ref path) = config.baseline {
        let baseline = PerformanceBaseline::load(path)
            .with_context(|| format!("Failed to load baseline {:?}", path))?;
        info!(
            "Comparing against baseline '{}' ({} configurations)",
            baseline.id,
            baseline.configurations.len()
        );
        coordinator.set_analyzer(Analyzer::with_baseline(&baseline));
    }

    let reporter = match config.reporting {
        Some(ref reporting) => {
            let sink = HttpReportSink::new(&reporting.endpoint, defaults::REPORT_TIMEOUT)?;
            let reporter = Arc::new(ResultReporter::start(Arc::new(sink), reporting.reporter));
            info!("Reporting results to {}", reporting.endpoint);
            coordinator.set_reporter(Arc::clone(&reporter));
            Some(reporter)
        }
        None => None,
    };

    let monitor = match config.routing {
        Some(ref routing) => {
            let probe = HttpHealthProbe::new(
                routing.health_url.clone(),
                routing.probe_timeout,
                routing.slow_threshold,
            )?;
            let monitor = HealthMonitor::new(Arc::new(probe), routing.interval);
            let mut changes = monitor.start_monitoring();
            tokio::spawn(async move {
                while let Some(status) = changes.next().await {
                    info!(%status, "Primary STT health changed");
                }
            });
            coordinator.set_stt_fallback(routing.fallback.clone(), monitor.status_receiver());
            Some(monitor)
        }
        None => None,
    };

    let cancel = coordinator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current test");
            cancel.cancel();
        }
    });

    // The event task owns the results manager until the coordinator is
    // dropped and the channel closes.
    let mut events = coordinator.subscribe();
    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(HarnessEvent::TestComplete { result })
                | Ok(HarnessEvent::TestFailed { result }) => {
                    results_manager.stream_result(&result)?;
                }
                Ok(HarnessEvent::RunProgress {
                    completed, total, ..
                }) => {
                    info!(
                        "{} {}/{}",
                        create_progress_indicator(completed, total, 30),
                        completed,
                        total
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Progress display skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        Ok::<_, anyhow::Error>(results_manager)
    });

    let run = coordinator.execute_suite(&config.suite).await?;
    let report = coordinator.analyze(&run);
    drop(coordinator);

    let mut results_manager = event_task
        .await
        .context("Result streaming task panicked")??;

    if let Some(monitor) = monitor {
        monitor.stop_monitoring();
    }
    if let Some(reporter) = reporter {
        reporter.stop().await;
        if reporter.dropped() > 0 {
            warn!("{} results could not be reported", reporter.dropped());
        }
    }

    print_summary(&run, &report);
    results_manager.finalize(&run, &report)?;

    if let Some(ref path) = config.save_baseline {
        PerformanceBaseline::from_report(&run.suite_id, &report)
            .save(path)
            .with_context(|| format!("Failed to save baseline {:?}", path))?;
        info!("Baseline saved to {:?}", path);
    }

    info!("Voice Latency Harness completed ({:?})", run.status);
    Ok(())
}

/// Print the ranked configurations, network projections and recommendations
fn print_summary(run: &TestRun, report: &AnalysisReport) {
    let summary = &report.summary;
    println!();
    let peak_memory_mb = run
        .results
        .iter()
        .map(|r| r.peak_memory_mb)
        .fold(0.0, f64::max);
    println!(
        "Run {}: {} ({} of {} tests succeeded in {}, peak memory {})",
        run.id,
        run.suite_name,
        summary.successful_tests,
        summary.total_tests,
        format_duration(Duration::from_secs_f64(run.elapsed_seconds().max(0.0))),
        format_memory_mb(peak_memory_mb)
    );
    println!();

    let widths = [4, 48, 12, 12, 7, 8];
    print_table_separator(&widths);
    print_table_row(
        &["Rank", "Configuration", "Median E2E", "P99 E2E", "Samples", "Cost/h"],
        &widths,
    );
    print_table_separator(&widths);
    for config in &report.best_configurations {
        print_table_row(
            &[
                &config.rank.to_string(),
                &config.config_id,
                &format_latency_ms(config.median_e2e_ms),
                &format_latency_ms(config.p99_e2e_ms),
                &config.sample_count.to_string(),
                &format!("${:.2}", config.estimated_cost_per_hour),
            ],
            &widths,
        );
    }
    print_table_separator(&widths);

    if !report.network_projections.is_empty() {
        println!();
        println!("Network projections (median / p99):");
        for projection in &report.network_projections {
            println!(
                "  {:<18} {:>10} / {:<10} {}/{} configs under target",
                projection.network.as_str(),
                format_latency_ms(projection.projected_median_ms),
                format_latency_ms(projection.projected_p99_ms),
                projection.configs_meeting_target,
                projection.total_configs
            );
        }
    }

    println!();
    println!("Recommendations:");
    for recommendation in &report.recommendations {
        println!("  - {}", recommendation);
    }
    println!();
}
