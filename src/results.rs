use crate::{
    analyzer::AnalysisReport,
    suite::{AudioEngineTestConfig, LlmTestConfig, NetworkProfile, SttTestConfig, TtsTestConfig},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Device thermal pressure, ordered from least to most severe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalState {
    #[default]
    Nominal,
    Fair,
    Serious,
    Critical,
}

impl ThermalState {
    /// Classify a die temperature in degrees Celsius
    pub fn from_celsius(temp_c: f32) -> Self {
        if temp_c >= 95.0 {
            ThermalState::Critical
        } else if temp_c >= 85.0 {
            ThermalState::Serious
        } else if temp_c >= 70.0 {
            ThermalState::Fair
        } else {
            ThermalState::Nominal
        }
    }
}

/// Kind of client that produced a result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    IosSimulator,
    IosDevice,
    Web,
    #[default]
    Headless,
}

/// Terminal record of one scenario execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    pub config_id: String,
    pub scenario_name: String,
    pub repetition: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub client_type: ClientType,

    #[serde(default)]
    pub stt_latency_ms: Option<f64>,
    #[serde(rename = "llmTTFBMs")]
    pub llm_ttfb_ms: f64,
    pub llm_completion_ms: f64,
    #[serde(rename = "ttsTTFBMs")]
    pub tts_ttfb_ms: f64,
    pub tts_completion_ms: f64,
    pub e2e_latency_ms: f64,

    pub network_profile: NetworkProfile,
    #[serde(default)]
    pub network_projections: BTreeMap<String, f64>,

    #[serde(default)]
    pub stt_confidence: Option<f64>,
    #[serde(default)]
    pub tts_audio_duration_ms: Option<f64>,
    #[serde(default)]
    pub llm_output_tokens: Option<u32>,
    #[serde(default)]
    pub llm_input_tokens: Option<u32>,

    #[serde(rename = "peakCPUPercent", default)]
    pub peak_cpu_percent: f64,
    #[serde(rename = "peakMemoryMB", default)]
    pub peak_memory_mb: f64,
    #[serde(default)]
    pub thermal_state: ThermalState,

    #[serde(default)]
    pub stt_config: Option<SttTestConfig>,
    #[serde(default)]
    pub llm_config: Option<LlmTestConfig>,
    #[serde(default)]
    pub tts_config: Option<TtsTestConfig>,
    #[serde(default)]
    pub audio_config: Option<AudioEngineTestConfig>,

    #[serde(default)]
    pub errors: Vec<String>,
}

impl TestResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether each stage crossed the network, from the config snapshot.
    /// Results without a snapshot are treated as fully remote.
    pub fn network_stages(&self) -> (bool, bool, bool) {
        let stt = self
            .stt_config
            .as_ref()
            .map_or(true, |c| c.requires_network());
        let llm = self
            .llm_config
            .as_ref()
            .map_or(true, |c| c.requires_network());
        let tts = self
            .tts_config
            .as_ref()
            .map_or(true, |c| c.requires_network());
        (stt, llm, tts)
    }

    /// Projected E2E latency under `profile`: one added delay per remote stage
    pub fn projected_e2e_ms(&self, profile: NetworkProfile) -> f64 {
        let (stt, llm, tts) = self.network_stages();
        let hops = [stt, llm, tts].iter().filter(|&&hop| hop).count() as f64;
        self.e2e_latency_ms + hops * profile.added_latency_ms()
    }

    /// Projection for every profile, keyed by wire name
    pub fn calculate_network_projections(&self) -> BTreeMap<String, f64> {
        NetworkProfile::ALL
            .iter()
            .map(|profile| (profile.as_str().to_string(), self.projected_e2e_ms(*profile)))
            .collect()
    }
}

/// Body of `POST /runs/{runId}/results`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBatch {
    pub results: Vec<TestResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Execution of a whole suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    pub id: String,
    pub suite_name: String,
    pub suite_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub client_id: String,
    #[serde(default)]
    pub client_type: ClientType,
    pub status: RunStatus,
    pub total_configurations: usize,
    #[serde(default)]
    pub completed_configurations: usize,
    #[serde(default)]
    pub results: Vec<TestResult>,
}

impl TestRun {
    pub fn new(suite_id: &str, suite_name: &str, client_id: &str, total: usize) -> Self {
        Self {
            id: crate::utils::generate_test_id(),
            suite_name: suite_name.to_string(),
            suite_id: suite_id.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            client_id: client_id.to_string(),
            client_type: ClientType::default(),
            status: RunStatus::Pending,
            total_configurations: total,
            completed_configurations: 0,
            results: Vec::new(),
        }
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_configurations == 0 {
            return 0.0;
        }
        self.completed_configurations as f64 / self.total_configurations as f64 * 100.0
    }

    /// Seconds between start and completion, or now while still running
    pub fn elapsed_seconds(&self) -> f64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn successful_results(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    /// Record a completed configuration. Ignored once the run is terminal.
    pub fn push_result(&mut self, result: TestResult) {
        if self.status.is_terminal() {
            return;
        }
        self.results.push(result);
        self.completed_configurations += 1;
    }

    /// Move to a terminal status and stamp completion
    pub fn finish(&mut self, status: RunStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub memory_gb: f64,
    pub harness_version: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            memory_gb: sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
            harness_version: crate::VERSION.to_string(),
        }
    }
}

/// Final output document
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalHarnessResults {
    pub metadata: HarnessMetadata,
    pub run: TestRun,
    pub analysis: AnalysisReport,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HarnessMetadata {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub total_tests: usize,
    pub system_info: SystemInfo,
}

/// Writes run results to disk, optionally streaming each result as it lands
pub struct ResultsManager {
    output_file: PathBuf,
    streaming_file: Option<PathBuf>,
    streamed: usize,
}

impl ResultsManager {
    pub fn new(output_file: &Path) -> Result<Self> {
        Ok(Self {
            output_file: output_file.to_path_buf(),
            streaming_file: None,
            streamed: 0,
        })
    }

    /// Stream each result into a JSON array file as it completes
    pub fn enable_streaming<P: AsRef<Path>>(&mut self, streaming_file: P) -> Result<()> {
        let path = streaming_file.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Failed to create streaming file {:?}", path))?;
        writeln!(file, "[")?;

        debug!("Enabled streaming to: {:?}", path);
        self.streaming_file = Some(path);
        self.streamed = 0;
        Ok(())
    }

    pub fn is_streaming_enabled(&self) -> bool {
        self.streaming_file.is_some()
    }

    /// Append one result to the streaming file, if enabled
    pub fn stream_result(&mut self, result: &TestResult) -> Result<()> {
        let Some(ref path) = self.streaming_file else {
            return Ok(());
        };
        let mut file = OpenOptions::new().append(true).open(path)?;
        if self.streamed > 0 {
            writeln!(file, ",")?;
        }
        let json = serde_json::to_string(result)?;
        write!(file, "{}", json)?;
        file.flush()?;
        self.streamed += 1;
        Ok(())
    }

    /// Close the streaming array and write the consolidated document
    pub fn finalize(&mut self, run: &TestRun, analysis: &AnalysisReport) -> Result<()> {
        info!("Finalizing harness results");

        if let Some(ref path) = self.streaming_file {
            let mut file = OpenOptions::new().append(true).open(path)?;
            writeln!(file, "\n]")?;
            file.flush()?;
        }

        let document = FinalHarnessResults {
            metadata: HarnessMetadata {
                version: crate::VERSION.to_string(),
                timestamp: Utc::now(),
                total_tests: run.results.len(),
                system_info: SystemInfo::collect(),
            },
            run: run.clone(),
            analysis: analysis.clone(),
        };

        let json = serde_json::to_string_pretty(&document)?;
        std::fs::write(&self.output_file, json)
            .with_context(|| format!("Failed to write results to {:?}", self.output_file))?;

        info!("Results written to: {:?}", self.output_file);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    pub(crate) fn sample_result(config_id: &str, e2e_ms: f64) -> TestResult {
        TestResult {
            id: crate::utils::generate_test_id(),
            config_id: config_id.to_string(),
            scenario_name: "Short Response".to_string(),
            repetition: 1,
            timestamp: Utc::now(),
            client_type: ClientType::Headless,
            stt_latency_ms: Some(40.0),
            llm_ttfb_ms: 120.0,
            llm_completion_ms: 300.0,
            tts_ttfb_ms: 60.0,
            tts_completion_ms: 150.0,
            e2e_latency_ms: e2e_ms,
            network_profile: NetworkProfile::Localhost,
            network_projections: BTreeMap::new(),
            stt_confidence: Some(0.93),
            tts_audio_duration_ms: Some(1800.0),
            llm_output_tokens: Some(42),
            llm_input_tokens: Some(9),
            peak_cpu_percent: 37.5,
            peak_memory_mb: 212.25,
            thermal_state: ThermalState::Fair,
            stt_config: Some(SttTestConfig::new("deepgram")),
            llm_config: Some(LlmTestConfig::new("anthropic", "claude-3-5-haiku-20241022")),
            tts_config: Some(TtsTestConfig::new("chatterbox")),
            audio_config: Some(AudioEngineTestConfig::default()),
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_thermal_state_ordering() {
        assert!(ThermalState::Nominal < ThermalState::Fair);
        assert!(ThermalState::Fair < ThermalState::Serious);
        assert!(ThermalState::Serious < ThermalState::Critical);
        assert_eq!(ThermalState::from_celsius(45.0), ThermalState::Nominal);
        assert_eq!(ThermalState::from_celsius(72.0), ThermalState::Fair);
        assert_eq!(ThermalState::from_celsius(88.0), ThermalState::Serious);
        assert_eq!(ThermalState::from_celsius(101.0), ThermalState::Critical);
    }

    #[test]
    fn test_result_wire_field_names() {
        let result = sample_result("cfg", 500.0);
        let value = serde_json::to_value(&result).unwrap();
        for key in [
            "configId",
            "llmTTFBMs",
            "ttsTTFBMs",
            "e2eLatencyMs",
            "peakCPUPercent",
            "peakMemoryMB",
            "thermalState",
            "sttConfig",
            "networkProfile",
        ] {
            assert!(value.get(key).is_some(), "missing wire key {key}");
        }
        assert_eq!(value["thermalState"], "fair");
        assert_eq!(value["clientType"], "headless");
    }

    #[test]
    fn test_batch_round_trip() {
        let batch = ResultBatch {
            results: vec![sample_result("a", 410.5), sample_result("b", 612.125)],
        };
        let json = serde_json::to_string(&batch).unwrap();
        let decoded: ResultBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_projections_skip_on_device_stages() {
        let mut result = sample_result("cfg", 400.0);
        assert_eq!(result.projected_e2e_ms(NetworkProfile::CellularUs), 550.0);

        result.stt_config = Some(SttTestConfig::new("apple"));
        result.tts_config = Some(TtsTestConfig::new("apple"));
        assert_eq!(result.projected_e2e_ms(NetworkProfile::CellularUs), 450.0);

        let projections = result.calculate_network_projections();
        assert_eq!(projections.len(), 5);
        assert_eq!(projections["localhost"], 400.0);
        assert_eq!(projections["intercontinental"], 520.0);
    }

    #[test]
    fn test_run_lifecycle() {
        let mut run = TestRun::new("quick", "Quick", "local", 2);
        assert_eq!(run.progress_percent(), 0.0);

        run.push_result(sample_result("a", 100.0));
        assert_eq!(run.progress_percent(), 50.0);

        run.finish(RunStatus::Completed);
        assert!(run.completed_at.is_some());

        // Terminal runs are frozen
        run.push_result(sample_result("a", 100.0));
        run.finish(RunStatus::Failed);
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn test_results_manager_streaming() {
        let output = NamedTempFile::new().unwrap();
        let stream = NamedTempFile::new().unwrap();
        let mut manager = ResultsManager::new(output.path()).unwrap();
        manager.enable_streaming(stream.path()).unwrap();
        assert!(manager.is_streaming_enabled());

        let mut run = TestRun::new("quick", "Quick", "local", 2);
        for e2e in [100.0, 200.0] {
            let result = sample_result("a", e2e);
            manager.stream_result(&result).unwrap();
            run.push_result(result);
        }
        run.finish(RunStatus::Completed);

        let report = crate::analyzer::Analyzer::new().analyze(&run);
        manager.finalize(&run, &report).unwrap();

        let streamed: Vec<TestResult> =
            serde_json::from_str(&std::fs::read_to_string(stream.path()).unwrap()).unwrap();
        assert_eq!(streamed.len(), 2);

        let document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(output.path()).unwrap()).unwrap();
        assert_eq!(document["metadata"]["total_tests"], 2);
        assert_eq!(document["run"]["status"], "completed");
    }
}
