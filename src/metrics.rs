use crate::clock::PhaseTimer;
use crate::resources::ResourceSampler;
use crate::results::{ClientType, TestResult};
use crate::suite::TestConfiguration;
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Collector lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Running,
    Finalized,
}

/// Per-stage accumulators, reset on every `start_test`
#[derive(Debug, Default, Clone)]
struct StageMetrics {
    stt_latency_ms: Option<f64>,
    llm_ttfb_ms: Option<f64>,
    llm_completion_ms: Option<f64>,
    tts_ttfb_ms: Option<f64>,
    tts_completion_ms: Option<f64>,
    e2e_latency_ms: Option<f64>,
    stt_confidence: Option<f64>,
    tts_audio_duration_ms: Option<f64>,
    llm_input_tokens: Option<u32>,
    llm_output_tokens: Option<u32>,
    errors: Vec<String>,
}

/// Single-owner accumulator for one test execution
///
/// Setters are last-write-wins and only take effect while a test is running.
/// `finalize_test` freezes the result; calling it again returns the same
/// record until the next `start_test`.
pub struct MetricsCollector {
    state: CollectorState,
    config: Option<TestConfiguration>,
    client_type: ClientType,
    started: Option<PhaseTimer>,
    stages: StageMetrics,
    sampler: ResourceSampler,
    finalized: Option<TestResult>,
}

impl MetricsCollector {
    /// Create a collector sampling resources every `sample_interval`
    pub fn new(sample_interval: Duration) -> Self {
        Self::with_sampler(ResourceSampler::new(sample_interval))
    }

    pub fn with_sampler(sampler: ResourceSampler) -> Self {
        Self {
            state: CollectorState::Idle,
            config: None,
            client_type: ClientType::default(),
            started: None,
            stages: StageMetrics::default(),
            sampler,
            finalized: None,
        }
    }

    pub fn set_client_type(&mut self, client_type: ClientType) {
        self.client_type = client_type;
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    /// Reset all accumulators and begin measuring `config`
    pub fn start_test(&mut self, config: TestConfiguration) {
        self.sampler.stop();
        self.sampler.clear();

        debug!(config_id = %config.config_id(), repetition = config.repetition, "Starting test");
        self.stages = StageMetrics::default();
        self.finalized = None;
        self.config = Some(config);
        self.started = Some(PhaseTimer::start());
        self.state = CollectorState::Running;

        self.sampler.start();
    }

    /// Milliseconds since `start_test`, 0.0 when idle
    pub fn elapsed_since_start_ms(&self) -> f64 {
        self.started.map_or(0.0, |t| t.elapsed_ms())
    }

    fn stages_mut(&mut self, field: &str) -> Option<&mut StageMetrics> {
        if self.state == CollectorState::Running {
            Some(&mut self.stages)
        } else {
            debug!(field, state = ?self.state, "Ignoring metric outside a running test");
            None
        }
    }

    pub fn record_stt_latency(&mut self, ms: f64) {
        if let Some(s) = self.stages_mut("stt_latency") {
            s.stt_latency_ms = Some(ms.max(0.0));
        }
    }

    pub fn record_stt_confidence(&mut self, confidence: f64) {
        if let Some(s) = self.stages_mut("stt_confidence") {
            s.stt_confidence = Some(confidence);
        }
    }

    pub fn record_llm_ttfb(&mut self, ms: f64) {
        if let Some(s) = self.stages_mut("llm_ttfb") {
            s.llm_ttfb_ms = Some(ms.max(0.0));
        }
    }

    pub fn record_llm_completion(&mut self, ms: f64) {
        if let Some(s) = self.stages_mut("llm_completion") {
            s.llm_completion_ms = Some(ms.max(0.0));
        }
    }

    pub fn record_llm_tokens(&mut self, input: Option<u32>, output: u32) {
        if let Some(s) = self.stages_mut("llm_tokens") {
            s.llm_input_tokens = input;
            s.llm_output_tokens = Some(output);
        }
    }

    pub fn record_tts_ttfb(&mut self, ms: f64) {
        if let Some(s) = self.stages_mut("tts_ttfb") {
            s.tts_ttfb_ms = Some(ms.max(0.0));
        }
    }

    pub fn record_tts_completion(&mut self, ms: f64) {
        if let Some(s) = self.stages_mut("tts_completion") {
            s.tts_completion_ms = Some(ms.max(0.0));
        }
    }

    pub fn record_tts_audio_duration(&mut self, ms: f64) {
        if let Some(s) = self.stages_mut("tts_audio_duration") {
            s.tts_audio_duration_ms = Some(ms);
        }
    }

    /// Explicit end-to-end latency; overrides the wall-clock fallback
    pub fn record_e2e(&mut self, ms: f64) {
        if let Some(s) = self.stages_mut("e2e") {
            s.e2e_latency_ms = Some(ms.max(0.0));
        }
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        if let Some(s) = self.stages_mut("error") {
            s.errors.push(error);
        }
    }

    /// Stop sampling and produce the immutable result for this test
    pub fn finalize_test(&mut self) -> TestResult {
        self.sampler.stop();

        if let Some(ref result) = self.finalized {
            return result.clone();
        }

        if self.state == CollectorState::Idle {
            warn!("finalize_test called without start_test");
        }

        let stages = std::mem::take(&mut self.stages);
        let e2e_latency_ms = stages
            .e2e_latency_ms
            .unwrap_or_else(|| self.elapsed_since_start_ms())
            .max(0.0);
        let peaks = self.sampler.peaks();
        let config = self.config.as_ref();

        let mut result = TestResult {
            id: crate::utils::generate_test_id(),
            config_id: config.map(|c| c.config_id()).unwrap_or_default(),
            scenario_name: config.map(|c| c.scenario_name.clone()).unwrap_or_default(),
            repetition: config.map_or(0, |c| c.repetition),
            timestamp: Utc::now(),
            client_type: self.client_type,
            stt_latency_ms: stages.stt_latency_ms,
            llm_ttfb_ms: stages.llm_ttfb_ms.unwrap_or(0.0),
            llm_completion_ms: stages.llm_completion_ms.unwrap_or(0.0),
            tts_ttfb_ms: stages.tts_ttfb_ms.unwrap_or(0.0),
            tts_completion_ms: stages.tts_completion_ms.unwrap_or(0.0),
            e2e_latency_ms,
            network_profile: config.map(|c| c.network_profile).unwrap_or_default(),
            network_projections: BTreeMap::new(),
            stt_confidence: stages.stt_confidence,
            tts_audio_duration_ms: stages.tts_audio_duration_ms,
            llm_output_tokens: stages.llm_output_tokens,
            llm_input_tokens: stages.llm_input_tokens,
            peak_cpu_percent: peaks.peak_cpu_percent,
            peak_memory_mb: peaks.peak_memory_mb,
            thermal_state: peaks.thermal_state,
            stt_config: config.map(|c| c.stt.clone()),
            llm_config: config.map(|c| c.llm.clone()),
            tts_config: config.map(|c| c.tts.clone()),
            audio_config: config.map(|c| c.audio_engine.clone()),
            errors: stages.errors,
        };
        result.network_projections = result.calculate_network_projections();

        debug!(
            config_id = %result.config_id,
            e2e_ms = result.e2e_latency_ms,
            errors = result.errors.len(),
            "Test finalized"
        );

        self.state = CollectorState::Finalized;
        self.finalized = Some(result.clone());
        result
    }
}
