//! # Results Analysis
//!
//! Turns a completed [`TestRun`] into an [`AnalysisReport`]. Only successful
//! results (empty error list) are analyzed.
//!
//! ## Method
//!
//! - Results are grouped by `config_id`.
//! - Median and p99 use nearest rank, see [`crate::utils::percentile`].
//! - Spread is the sample standard deviation.
//! - Configurations are sorted ascending by median E2E and given **dense**
//!   ranks starting at 1: equal medians share a rank and the next distinct
//!   median takes the following integer.
//! - Network projections add a profile's latency once for every stage of the
//!   configuration that crosses the network.
//! - Regressions compare a configuration's median E2E against a stored
//!   baseline: more than 10% slower is minor, 20% moderate, 50% severe.

use crate::defaults::E2E_TARGET_MS;
use crate::results::{TestResult, TestRun};
use crate::suite::NetworkProfile;
use crate::utils::{median, percentile, sample_std_dev};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

const SECONDARY_TARGET_MS: f64 = 1000.0;
const COMPARISON_NOISE_PERCENT: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStatistics {
    pub total_configurations: usize,
    pub total_tests: usize,
    pub successful_tests: usize,
    pub failed_tests: usize,
    #[serde(rename = "overallMedianE2EMs")]
    pub overall_median_e2e_ms: f64,
    #[serde(rename = "overallP99E2EMs")]
    pub overall_p99_e2e_ms: f64,
    #[serde(rename = "overallMinE2EMs")]
    pub overall_min_e2e_ms: f64,
    #[serde(rename = "overallMaxE2EMs")]
    pub overall_max_e2e_ms: f64,
    pub median_stt_ms: Option<f64>,
    #[serde(rename = "medianLLMTTFBMs")]
    pub median_llm_ttfb_ms: f64,
    #[serde(rename = "medianLLMCompletionMs")]
    pub median_llm_completion_ms: f64,
    #[serde(rename = "medianTTSTTFBMs")]
    pub median_tts_ttfb_ms: f64,
    #[serde(rename = "medianTTSCompletionMs")]
    pub median_tts_completion_ms: f64,
    pub test_duration_minutes: f64,
}

impl SummaryStatistics {
    fn empty(run: &TestRun) -> Self {
        Self {
            total_configurations: 0,
            total_tests: run.results.len(),
            successful_tests: 0,
            failed_tests: run.results.len(),
            overall_median_e2e_ms: 0.0,
            overall_p99_e2e_ms: 0.0,
            overall_min_e2e_ms: 0.0,
            overall_max_e2e_ms: 0.0,
            median_stt_ms: None,
            median_llm_ttfb_ms: 0.0,
            median_llm_completion_ms: 0.0,
            median_tts_ttfb_ms: 0.0,
            median_tts_completion_ms: 0.0,
            test_duration_minutes: run.elapsed_seconds() / 60.0,
        }
    }
}

/// Per-stage medians for one configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyBreakdown {
    pub stt_ms: Option<f64>,
    #[serde(rename = "llmTTFBMs")]
    pub llm_ttfb_ms: f64,
    pub llm_completion_ms: f64,
    #[serde(rename = "ttsTTFBMs")]
    pub tts_ttfb_ms: f64,
    pub tts_completion_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMeetsTarget {
    pub e2e_ms: f64,
    pub meets_500ms: bool,
    pub meets_1000ms: bool,
}

impl NetworkMeetsTarget {
    fn new(e2e_ms: f64) -> Self {
        Self {
            e2e_ms,
            meets_500ms: e2e_ms < E2E_TARGET_MS,
            meets_1000ms: e2e_ms < SECONDARY_TARGET_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedConfiguration {
    pub rank: u32,
    pub config_id: String,
    #[serde(rename = "medianE2EMs")]
    pub median_e2e_ms: f64,
    #[serde(rename = "p99E2EMs")]
    pub p99_e2e_ms: f64,
    pub stddev_ms: f64,
    pub sample_count: usize,
    pub breakdown: LatencyBreakdown,
    pub network_projections: BTreeMap<String, NetworkMeetsTarget>,
    pub estimated_cost_per_hour: f64,
}

impl RankedConfiguration {
    /// Whether the LLM stage of this configuration runs on self-managed hardware
    pub fn is_self_hosted(&self) -> bool {
        self.config_id.contains("selfhosted") || self.config_id.contains("mlx")
    }
}

/// Aggregate projection across every successful result for one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProjection {
    pub network: NetworkProfile,
    pub added_latency_ms: f64,
    pub projected_median_ms: f64,
    pub projected_p99_ms: f64,
    pub meets_target: bool,
    pub configs_meeting_target: usize,
    pub total_configs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionSeverity {
    Minor,
    Moderate,
    Severe,
}

impl RegressionSeverity {
    /// Classify a slowdown; `None` when within 10% of baseline
    pub fn classify(change_percent: f64) -> Option<Self> {
        if change_percent > 50.0 {
            Some(RegressionSeverity::Severe)
        } else if change_percent > 20.0 {
            Some(RegressionSeverity::Moderate)
        } else if change_percent > 10.0 {
            Some(RegressionSeverity::Minor)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Regression {
    pub config_id: String,
    pub metric: String,
    pub baseline_value: f64,
    pub current_value: f64,
    pub change_percent: f64,
    pub severity: RegressionSeverity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub summary: SummaryStatistics,
    pub best_configurations: Vec<RankedConfiguration>,
    pub network_projections: Vec<NetworkProjection>,
    pub regressions: Vec<Regression>,
    pub recommendations: Vec<String>,
}

impl AnalysisReport {
    pub fn best(&self) -> Option<&RankedConfiguration> {
        self.best_configurations.first()
    }

    pub fn projection(&self, network: NetworkProfile) -> Option<&NetworkProjection> {
        self.network_projections.iter().find(|p| p.network == network)
    }
}

/// Stored reference metrics for one configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineMetrics {
    pub e2e_median_ms: f64,
    #[serde(default)]
    pub e2e_p99_ms: Option<f64>,
}

/// Named set of baselines keyed by `config_id`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceBaseline {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub source_run_id: Option<String>,
    pub configurations: HashMap<String, BaselineMetrics>,
}

impl PerformanceBaseline {
    /// Capture the ranked medians of `report` as a new baseline
    pub fn from_report(id: impl Into<String>, report: &AnalysisReport) -> Self {
        Self {
            id: id.into(),
            created_at: Some(Utc::now()),
            source_run_id: Some(report.run_id.clone()),
            configurations: report
                .best_configurations
                .iter()
                .map(|c| {
                    (
                        c.config_id.clone(),
                        BaselineMetrics {
                            e2e_median_ms: c.median_e2e_ms,
                            e2e_p99_ms: Some(c.p99_e2e_ms),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::error::Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChange {
    pub config_id: String,
    pub run1_median_ms: f64,
    pub run2_median_ms: f64,
    pub change_percent: f64,
    pub improved: bool,
    pub regressed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunComparison {
    pub run1_id: String,
    pub run2_id: String,
    pub common_configurations: usize,
    pub added_configurations: Vec<String>,
    pub removed_configurations: Vec<String>,
    /// Sorted from most improved to most regressed
    pub changes: Vec<ConfigChange>,
    pub run1_overall_median_ms: f64,
    pub run2_overall_median_ms: f64,
    pub overall_change_percent: f64,
}

/// Estimated provider spend per hour of conversation, in USD
pub fn estimate_cost_per_hour(stt: &str, llm: &str, tts: &str) -> f64 {
    let llm_cost = match llm {
        "anthropic" => 0.50,
        "openai" => 0.40,
        _ => 0.0,
    };
    let stt_cost = match stt {
        "deepgram" => 0.26,
        "assemblyai" => 0.37,
        _ => 0.0,
    };
    let tts_cost = match tts {
        "elevenlabs-flash" | "elevenlabs-turbo" => 0.30,
        _ => 0.0,
    };
    llm_cost + stt_cost + tts_cost
}

fn estimate_result_cost(result: &TestResult) -> f64 {
    estimate_cost_per_hour(
        result.stt_config.as_ref().map_or("", |c| c.provider.as_str()),
        result.llm_config.as_ref().map_or("", |c| c.provider.as_str()),
        result.tts_config.as_ref().map_or("", |c| c.provider.as_str()),
    )
}

fn percent_change(from: f64, to: f64) -> f64 {
    if from > 0.0 {
        (to - from) / from * 100.0
    } else {
        0.0
    }
}

fn group_by_config<'a>(results: &[&'a TestResult]) -> BTreeMap<&'a str, Vec<&'a TestResult>> {
    let mut groups: BTreeMap<&str, Vec<&TestResult>> = BTreeMap::new();
    for r in results {
        groups.entry(r.config_id.as_str()).or_default().push(r);
    }
    groups
}

/// Stateless analysis over completed runs, optionally against baselines
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    baselines: HashMap<String, BaselineMetrics>,
}

impl Analyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_baseline(baseline: &PerformanceBaseline) -> Self {
        Self {
            baselines: baseline.configurations.clone(),
        }
    }

    pub fn analyze(&self, run: &TestRun) -> AnalysisReport {
        let successful: Vec<&TestResult> = run.successful_results().collect();
        if successful.is_empty() {
            debug!(run_id = %run.id, "No successful results; empty report");
            return AnalysisReport {
                run_id: run.id.clone(),
                generated_at: Utc::now(),
                summary: SummaryStatistics::empty(run),
                best_configurations: Vec::new(),
                network_projections: Vec::new(),
                regressions: Vec::new(),
                recommendations: vec!["No successful test results to analyze".to_string()],
            };
        }

        let groups = group_by_config(&successful);
        let summary = self.summarize(run, &successful, groups.len());
        let best_configurations = self.rank_configurations(&groups);
        let network_projections = self.project_networks(&successful, &best_configurations);
        let regressions = self.detect_regressions(&groups);
        let recommendations =
            recommendations(&best_configurations, &network_projections, &regressions);

        AnalysisReport {
            run_id: run.id.clone(),
            generated_at: Utc::now(),
            summary,
            best_configurations,
            network_projections,
            regressions,
            recommendations,
        }
    }

    fn summarize(
        &self,
        run: &TestRun,
        results: &[&TestResult],
        configurations: usize,
    ) -> SummaryStatistics {
        let e2e: Vec<f64> = results.iter().map(|r| r.e2e_latency_ms).collect();
        let stt: Vec<f64> = results.iter().filter_map(|r| r.stt_latency_ms).collect();
        let stage = |f: fn(&TestResult) -> f64| -> f64 {
            median(&results.iter().map(|r| f(r)).collect::<Vec<_>>())
        };

        SummaryStatistics {
            total_configurations: configurations,
            total_tests: run.results.len(),
            successful_tests: results.len(),
            failed_tests: run.results.len() - results.len(),
            overall_median_e2e_ms: median(&e2e),
            overall_p99_e2e_ms: percentile(&e2e, 99.0),
            overall_min_e2e_ms: e2e.iter().cloned().fold(f64::INFINITY, f64::min),
            overall_max_e2e_ms: e2e.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            median_stt_ms: (!stt.is_empty()).then(|| median(&stt)),
            median_llm_ttfb_ms: stage(|r| r.llm_ttfb_ms),
            median_llm_completion_ms: stage(|r| r.llm_completion_ms),
            median_tts_ttfb_ms: stage(|r| r.tts_ttfb_ms),
            median_tts_completion_ms: stage(|r| r.tts_completion_ms),
            test_duration_minutes: run.elapsed_seconds() / 60.0,
        }
    }

    fn rank_configurations(
        &self,
        groups: &BTreeMap<&str, Vec<&TestResult>>,
    ) -> Vec<RankedConfiguration> {
        let mut ranked: Vec<RankedConfiguration> = groups
            .iter()
            .map(|(config_id, results)| {
                let e2e: Vec<f64> = results.iter().map(|r| r.e2e_latency_ms).collect();
                let stt: Vec<f64> = results.iter().filter_map(|r| r.stt_latency_ms).collect();
                let stage = |f: fn(&TestResult) -> f64| -> f64 {
                    median(&results.iter().map(|r| f(r)).collect::<Vec<_>>())
                };
                let median_e2e_ms = median(&e2e);

                let first = results[0];
                let network_projections = NetworkProfile::ALL
                    .iter()
                    .map(|profile| {
                        let shift = first.projected_e2e_ms(*profile) - first.e2e_latency_ms;
                        (
                            profile.as_str().to_string(),
                            NetworkMeetsTarget::new(median_e2e_ms + shift),
                        )
                    })
                    .collect();

                RankedConfiguration {
                    rank: 0,
                    config_id: config_id.to_string(),
                    median_e2e_ms,
                    p99_e2e_ms: percentile(&e2e, 99.0),
                    stddev_ms: sample_std_dev(&e2e),
                    sample_count: results.len(),
                    breakdown: LatencyBreakdown {
                        stt_ms: (!stt.is_empty()).then(|| median(&stt)),
                        llm_ttfb_ms: stage(|r| r.llm_ttfb_ms),
                        llm_completion_ms: stage(|r| r.llm_completion_ms),
                        tts_ttfb_ms: stage(|r| r.tts_ttfb_ms),
                        tts_completion_ms: stage(|r| r.tts_completion_ms),
                    },
                    network_projections,
                    estimated_cost_per_hour: estimate_result_cost(first),
                }
            })
            .collect();

        ranked.sort_by(|a, b| a.median_e2e_ms.total_cmp(&b.median_e2e_ms));

        let mut rank = 0;
        let mut previous: Option<f64> = None;
        for config in &mut ranked {
            if previous != Some(config.median_e2e_ms) {
                rank += 1;
                previous = Some(config.median_e2e_ms);
            }
            config.rank = rank;
        }
        ranked
    }

    fn project_networks(
        &self,
        results: &[&TestResult],
        ranked: &[RankedConfiguration],
    ) -> Vec<NetworkProjection> {
        NetworkProfile::ALL
            .iter()
            .map(|&profile| {
                let key = profile.as_str();
                let projected: Vec<f64> = results
                    .iter()
                    .map(|r| {
                        r.network_projections
                            .get(key)
                            .copied()
                            .unwrap_or_else(|| r.projected_e2e_ms(profile))
                    })
                    .collect();
                let projected_median_ms = median(&projected);
                let configs_meeting_target = ranked
                    .iter()
                    .filter(|c| c.network_projections.get(key).is_some_and(|p| p.meets_500ms))
                    .count();

                NetworkProjection {
                    network: profile,
                    added_latency_ms: profile.added_latency_ms(),
                    projected_median_ms,
                    projected_p99_ms: percentile(&projected, 99.0),
                    meets_target: projected_median_ms < E2E_TARGET_MS,
                    configs_meeting_target,
                    total_configs: ranked.len(),
                }
            })
            .collect()
    }

    fn detect_regressions(&self, groups: &BTreeMap<&str, Vec<&TestResult>>) -> Vec<Regression> {
        groups
            .iter()
            .filter_map(|(config_id, results)| {
                let baseline = self.baselines.get(*config_id)?;
                let current = median(&results.iter().map(|r| r.e2e_latency_ms).collect::<Vec<_>>());
                let change_percent = percent_change(baseline.e2e_median_ms, current);
                let severity = RegressionSeverity::classify(change_percent)?;
                Some(Regression {
                    config_id: config_id.to_string(),
                    metric: "e2e_median_ms".to_string(),
                    baseline_value: baseline.e2e_median_ms,
                    current_value: current,
                    change_percent,
                    severity,
                })
            })
            .collect()
    }

    /// Compare two runs configuration by configuration
    pub fn compare_runs(&self, run1: &TestRun, run2: &TestRun) -> RunComparison {
        let report1 = self.analyze(run1);
        let report2 = self.analyze(run2);

        let medians = |report: &AnalysisReport| -> BTreeMap<String, f64> {
            report
                .best_configurations
                .iter()
                .map(|c| (c.config_id.clone(), c.median_e2e_ms))
                .collect()
        };
        let before = medians(&report1);
        let after = medians(&report2);
        let before_ids: BTreeSet<&String> = before.keys().collect();
        let after_ids: BTreeSet<&String> = after.keys().collect();

        let mut changes: Vec<ConfigChange> = before_ids
            .intersection(&after_ids)
            .map(|id| {
                let (m1, m2) = (before[*id], after[*id]);
                let change_percent = percent_change(m1, m2);
                ConfigChange {
                    config_id: id.to_string(),
                    run1_median_ms: m1,
                    run2_median_ms: m2,
                    change_percent,
                    improved: change_percent < -COMPARISON_NOISE_PERCENT,
                    regressed: change_percent > COMPARISON_NOISE_PERCENT,
                }
            })
            .collect();
        changes.sort_by(|a, b| a.change_percent.total_cmp(&b.change_percent));

        RunComparison {
            run1_id: run1.id.clone(),
            run2_id: run2.id.clone(),
            common_configurations: changes.len(),
            added_configurations: after_ids.difference(&before_ids).map(|s| s.to_string()).collect(),
            removed_configurations: before_ids.difference(&after_ids).map(|s| s.to_string()).collect(),
            changes,
            run1_overall_median_ms: report1.summary.overall_median_e2e_ms,
            run2_overall_median_ms: report2.summary.overall_median_e2e_ms,
            overall_change_percent: percent_change(
                report1.summary.overall_median_e2e_ms,
                report2.summary.overall_median_e2e_ms,
            ),
        }
    }
}

fn recommendations(
    ranked: &[RankedConfiguration],
    projections: &[NetworkProjection],
    regressions: &[Regression],
) -> Vec<String> {
    let Some(best) = ranked.first() else {
        return vec!["No successful test results to analyze".to_string()];
    };

    let mut out = vec![format!(
        "Best configuration: {} with {:.0}ms median E2E latency",
        best.config_id, best.median_e2e_ms
    )];

    let find = |network: NetworkProfile| projections.iter().find(|p| p.network == network);
    if find(NetworkProfile::Localhost).is_some_and(|p| p.meets_target) {
        out.push("Target of <500ms median E2E achieved on localhost".to_string());
    }

    if let Some(cellular) = find(NetworkProfile::CellularUs) {
        if cellular.meets_target {
            out.push(format!(
                "Target achieved on cellular network ({:.0}ms projected)",
                cellular.projected_median_ms
            ));
        } else {
            out.push(format!(
                "Cellular network exceeds target by {:.0}ms - consider on-device providers to reduce network hops",
                cellular.projected_median_ms - E2E_TARGET_MS
            ));
        }
    }

    let best_self_hosted = ranked.iter().find(|c| c.is_self_hosted());
    let best_cloud = ranked.iter().find(|c| !c.is_self_hosted());
    if let (Some(local), Some(cloud)) = (best_self_hosted, best_cloud) {
        if local.median_e2e_ms < cloud.median_e2e_ms {
            out.push(format!(
                "Self-hosted stack saves {:.0}ms vs best cloud option",
                cloud.median_e2e_ms - local.median_e2e_ms
            ));
        }
    }

    let severe = regressions
        .iter()
        .filter(|r| r.severity == RegressionSeverity::Severe)
        .count();
    if severe > 0 {
        out.push(format!(
            "ALERT: {} severe regressions detected - investigate immediately",
            severe
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::tests::sample_result;
    use crate::results::RunStatus;
    use crate::suite::{LlmTestConfig, SttTestConfig, TtsTestConfig};

    fn run_with(results: Vec<TestResult>) -> TestRun {
        let mut run = TestRun::new("suite", "Suite", "local", results.len());
        for r in results {
            run.push_result(r);
        }
        run.finish(RunStatus::Completed);
        run
    }

    fn failed(config_id: &str) -> TestResult {
        let mut r = sample_result(config_id, 5.0);
        r.errors.push("llm failed: boom".to_string());
        r
    }

    #[test]
    fn test_dense_ranking() {
        let run = run_with(vec![
            sample_result("a", 300.0),
            sample_result("b", 150.0),
            sample_result("c", 450.0),
        ]);
        let report = Analyzer::new().analyze(&run);
        let ranks: BTreeMap<_, _> = report
            .best_configurations
            .iter()
            .map(|c| (c.config_id.as_str(), c.rank))
            .collect();
        assert_eq!(ranks["a"], 2);
        assert_eq!(ranks["b"], 1);
        assert_eq!(ranks["c"], 3);
    }

    #[test]
    fn test_ties_share_rank() {
        let run = run_with(vec![
            sample_result("a", 200.0),
            sample_result("b", 100.0),
            sample_result("c", 100.0),
        ]);
        let ranks: Vec<u32> = Analyzer::new()
            .analyze(&run)
            .best_configurations
            .iter()
            .map(|c| c.rank)
            .collect();
        assert_eq!(ranks, vec![1, 1, 2]);
    }

    #[test]
    fn test_nearest_rank_statistics() {
        let mut results: Vec<TestResult> = (0..9).map(|_| sample_result("a", 100.0)).collect();
        results.push(sample_result("a", 1000.0));
        let report = Analyzer::new().analyze(&run_with(results));

        let config = report.best().unwrap();
        assert_eq!(config.median_e2e_ms, 100.0);
        assert_eq!(config.p99_e2e_ms, 1000.0);
        assert_eq!(config.sample_count, 10);
        assert!(config.stddev_ms > 0.0);
        assert_eq!(report.summary.overall_max_e2e_ms, 1000.0);
    }

    #[test]
    fn test_failed_results_are_excluded() {
        let run = run_with(vec![sample_result("a", 300.0), failed("b")]);
        let report = Analyzer::new().analyze(&run);
        assert_eq!(report.summary.total_tests, 2);
        assert_eq!(report.summary.successful_tests, 1);
        assert_eq!(report.summary.failed_tests, 1);
        assert_eq!(report.best_configurations.len(), 1);
    }

    #[test]
    fn test_empty_report() {
        let report = Analyzer::new().analyze(&run_with(vec![failed("a")]));
        assert!(report.best_configurations.is_empty());
        assert!(report.network_projections.is_empty());
        assert_eq!(
            report.recommendations,
            vec!["No successful test results to analyze".to_string()]
        );
    }

    #[test]
    fn test_projections_count_network_stages() {
        let cloud = sample_result("cloud", 400.0);
        let mut on_device = sample_result("device", 400.0);
        on_device.stt_config = Some(SttTestConfig::new("apple"));
        on_device.llm_config = Some(LlmTestConfig::new("mlx", "llama-3.2-1b"));
        on_device.tts_config = Some(TtsTestConfig::new("apple"));

        let report = Analyzer::new().analyze(&run_with(vec![cloud, on_device]));
        let by_id: BTreeMap<_, _> = report
            .best_configurations
            .iter()
            .map(|c| (c.config_id.as_str(), c))
            .collect();

        let cellular = &by_id["cloud"].network_projections["cellular_us"];
        assert_eq!(cellular.e2e_ms, 550.0);
        assert!(!cellular.meets_500ms);
        assert!(cellular.meets_1000ms);
        assert_eq!(by_id["device"].network_projections["intercontinental"].e2e_ms, 400.0);

        let projection = report.projection(NetworkProfile::CellularUs).unwrap();
        assert_eq!(projection.added_latency_ms, 50.0);
        assert_eq!(projection.total_configs, 2);
        assert_eq!(projection.configs_meeting_target, 1);
        // Nearest-rank median of [400, 550]
        assert_eq!(projection.projected_median_ms, 400.0);
        assert_eq!(projection.projected_p99_ms, 550.0);
    }

    #[test]
    fn test_regression_severity() {
        assert_eq!(RegressionSeverity::classify(5.0), None);
        assert_eq!(RegressionSeverity::classify(10.0), None);
        assert_eq!(RegressionSeverity::classify(12.5), Some(RegressionSeverity::Minor));
        assert_eq!(RegressionSeverity::classify(25.0), Some(RegressionSeverity::Moderate));
        assert_eq!(RegressionSeverity::classify(75.0), Some(RegressionSeverity::Severe));
    }

    #[test]
    fn test_regressions_against_baseline() {
        let baseline = PerformanceBaseline {
            id: "nightly".into(),
            configurations: [
                ("a", 400.0),
                ("b", 400.0),
                ("c", 400.0),
            ]
            .into_iter()
            .map(|(id, median)| {
                (
                    id.to_string(),
                    BaselineMetrics {
                        e2e_median_ms: median,
                        e2e_p99_ms: None,
                    },
                )
            })
            .collect(),
            ..Default::default()
        };
        let run = run_with(vec![
            sample_result("a", 420.0),
            sample_result("b", 500.0),
            sample_result("c", 700.0),
            sample_result("untracked", 900.0),
        ]);
        let report = Analyzer::with_baseline(&baseline).analyze(&run);

        let severities: BTreeMap<_, _> = report
            .regressions
            .iter()
            .map(|r| (r.config_id.as_str(), r.severity))
            .collect();
        assert_eq!(severities.len(), 2);
        assert_eq!(severities["b"], RegressionSeverity::Moderate);
        assert_eq!(severities["c"], RegressionSeverity::Severe);
        assert!(report
            .recommendations
            .contains(&"ALERT: 1 severe regressions detected - investigate immediately".to_string()));
    }

    #[test]
    fn test_recommendations() {
        let mut local = sample_result("deepgram_selfhosted_qwen2.5:7b_chatterbox", 320.0);
        local.llm_config = Some(LlmTestConfig::new("selfhosted", "qwen2.5:7b"));
        let cloud = sample_result("deepgram_anthropic_claude_chatterbox", 420.0);

        let report = Analyzer::new().analyze(&run_with(vec![local, cloud]));
        let recs = &report.recommendations;
        assert_eq!(
            recs[0],
            "Best configuration: deepgram_selfhosted_qwen2.5:7b_chatterbox with 320ms median E2E latency"
        );
        assert!(recs.contains(&"Target of <500ms median E2E achieved on localhost".to_string()));
        // Cellular median is the lower of [470, 570]
        assert!(recs.contains(&"Target achieved on cellular network (470ms projected)".to_string()));
        assert!(recs.contains(&"Self-hosted stack saves 100ms vs best cloud option".to_string()));
    }

    #[test]
    fn test_cellular_gap_recommendation() {
        let report = Analyzer::new().analyze(&run_with(vec![sample_result("slow", 600.0)]));
        assert!(report.recommendations.contains(
            &"Cellular network exceeds target by 250ms - consider on-device providers to reduce network hops"
                .to_string()
        ));
        assert!(!report
            .recommendations
            .iter()
            .any(|r| r.starts_with("Target of <500ms")));
    }

    #[test]
    fn test_cost_estimate() {
        assert!((estimate_cost_per_hour("deepgram", "anthropic", "chatterbox") - 0.76).abs() < 1e-9);
        assert_eq!(estimate_cost_per_hour("apple", "mlx", "apple"), 0.0);
        assert!((estimate_cost_per_hour("assemblyai", "openai", "elevenlabs-flash") - 1.07).abs() < 1e-9);
    }

    #[test]
    fn test_compare_runs() {
        let run1 = run_with(vec![
            sample_result("a", 400.0),
            sample_result("b", 400.0),
            sample_result("gone", 400.0),
        ]);
        let run2 = run_with(vec![
            sample_result("a", 300.0),
            sample_result("b", 410.0),
            sample_result("new", 200.0),
        ]);
        let comparison = Analyzer::new().compare_runs(&run1, &run2);

        assert_eq!(comparison.common_configurations, 2);
        assert_eq!(comparison.added_configurations, vec!["new".to_string()]);
        assert_eq!(comparison.removed_configurations, vec!["gone".to_string()]);
        assert_eq!(comparison.changes[0].config_id, "a");
        assert!(comparison.changes[0].improved);
        assert!(!comparison.changes[1].improved && !comparison.changes[1].regressed);
    }

    #[test]
    fn test_baseline_round_trip() {
        let report = Analyzer::new().analyze(&run_with(vec![sample_result("a", 250.0)]));
        let baseline = PerformanceBaseline::from_report("main", &report);
        let file = tempfile::NamedTempFile::new().unwrap();
        baseline.save(file.path()).unwrap();

        let loaded = PerformanceBaseline::load(file.path()).unwrap();
        assert_eq!(loaded.configurations["a"].e2e_median_ms, 250.0);
        assert_eq!(loaded.source_run_id, Some(report.run_id));
    }
}
