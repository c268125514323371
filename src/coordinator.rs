//! # Test Coordination
//!
//! [`TestCoordinator`] drives one scenario at a time through the voice
//! pipeline and turns the measurements into a [`TestResult`]:
//!
//! 1. **Transcription** (audio scenarios only). Audio is streamed to STT in
//!    fixed-size chunks; STT latency runs from the end of audio to the final
//!    transcript. Without an audio path the scenario text is used instead.
//! 2. **Completion**. The LLM request is streamed; time to first token and
//!    completion time are stamped as deltas arrive.
//! 3. **Synthesis**. The full response is synthesized; time to first byte,
//!    completion time and played audio duration are recorded.
//! 4. **End to end**. Stamped at the first TTS audio byte, measured from the
//!    end of user input. For TTS-only scenarios it equals the TTS TTFB.
//!
//! Every stage is bounded by the configured stage timeout. Failures inside a
//! scenario are recorded into the result rather than returned; only
//! configuration errors abort the caller.
//!
//! Suites run their configurations sequentially, so one test never competes
//! with another for CPU or network.

use crate::analyzer::{AnalysisReport, Analyzer};
use crate::clock::PhaseTimer;
use crate::error::{HarnessError, Result};
use crate::health::HealthStatus;
use crate::metrics::MetricsCollector;
use crate::reporter::ResultReporter;
use crate::results::{ClientType, RunStatus, TestResult, TestRun};
use crate::router::ProviderRouter;
use crate::services::{
    AudioFormat, LanguageModel, LlmMessage, ServiceFactory, SpeechToText, TextToSpeech,
};
use crate::suite::{
    AudioEngineTestConfig, LlmTestConfig, NetworkProfile, ResponseType, ScenarioType,
    SttTestConfig, TestConfiguration, TestScenario, TestSuiteDefinition, TtsTestConfig,
};
use futures::StreamExt;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 256;
const STT_SAMPLE_RATE: u32 = 16_000;
const WAV_HEADER_LEN: usize = 44;

/// Progress notifications for UIs and external orchestrators
#[derive(Debug, Clone, PartialEq)]
pub enum HarnessEvent {
    TestStarted {
        config_id: String,
        scenario_name: String,
        repetition: u32,
    },
    SttComplete {
        latency_ms: f64,
        transcript: String,
    },
    LlmFirstToken {
        ttfb_ms: f64,
    },
    LlmComplete {
        completion_ms: f64,
        output_tokens: u32,
    },
    TtsFirstByte {
        ttfb_ms: f64,
    },
    TtsComplete {
        completion_ms: f64,
        audio_duration_ms: f64,
    },
    TestComplete {
        result: Box<TestResult>,
    },
    /// Carries the partial result; `errors` is non-empty
    TestFailed {
        result: Box<TestResult>,
    },
    RunProgress {
        run_id: String,
        completed: usize,
        total: usize,
    },
}

/// Coordinator tunables
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub client_id: String,
    pub client_type: ClientType,
    /// Upper bound for each backend stage
    pub stage_timeout: Duration,
    pub sample_interval: Duration,
    /// Size of each audio chunk sent to STT
    pub audio_chunk_ms: u32,
    pub system_prompt: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            client_id: "headless".to_string(),
            client_type: ClientType::Headless,
            stage_timeout: crate::defaults::STAGE_TIMEOUT,
            sample_interval: crate::defaults::SAMPLE_INTERVAL,
            audio_chunk_ms: crate::defaults::AUDIO_CHUNK_MS,
            system_prompt: None,
        }
    }
}

/// Shared flag for stopping a suite between configurations
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Secondary STT used when the primary's health feed reports Unhealthy
struct SttFallback {
    config: SttTestConfig,
    health: watch::Receiver<HealthStatus>,
}

/// Input to the LLM stage and the instant user input ended
struct UserInput {
    text: String,
    ended: PhaseTimer,
}

async fn with_timeout<T, F>(stage: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| HarnessError::Timeout {
            stage,
            timeout: limit,
        })?
}

fn emit(events: &broadcast::Sender<HarnessEvent>, event: HarnessEvent) {
    // No subscribers is not an error
    let _ = events.send(event);
}

/// Rough token estimate for providers that do not report input usage
fn estimate_tokens(messages: &[LlmMessage]) -> u32 {
    let chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    ((chars / 4) as u32).max(1)
}

/// Raw PCM payload of an utterance file, skipping a canonical WAV header
async fn load_audio(path: &Path) -> Result<Vec<u8>> {
    let mut bytes = tokio::fs::read(path).await?;
    if bytes.len() > WAV_HEADER_LEN && bytes.starts_with(b"RIFF") {
        bytes.drain(..WAV_HEADER_LEN);
    }
    if bytes.is_empty() {
        return Err(HarnessError::execution(
            "stt",
            format!("audio file {} is empty", path.display()),
        ));
    }
    Ok(bytes)
}

pub struct TestCoordinator {
    config: CoordinatorConfig,
    factory: Option<Arc<dyn ServiceFactory>>,
    stt_fallback: Option<SttFallback>,
    reporter: Option<Arc<ResultReporter>>,
    analyzer: Analyzer,
    metrics: MetricsCollector,
    events: broadcast::Sender<HarnessEvent>,
    cancel: CancelHandle,
}

impl TestCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let mut metrics = MetricsCollector::new(config.sample_interval);
        metrics.set_client_type(config.client_type);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            factory: None,
            stt_fallback: None,
            reporter: None,
            analyzer: Analyzer::new(),
            metrics,
            events,
            cancel: CancelHandle::default(),
        }
    }

    /// Install the provider factory. Required before executing anything.
    pub fn configure(&mut self, factory: Arc<dyn ServiceFactory>) {
        self.factory = Some(factory);
    }

    pub fn is_configured(&self) -> bool {
        self.factory.is_some()
    }

    /// Route STT sessions through a health-aware router
    pub fn set_stt_fallback(
        &mut self,
        fallback: SttTestConfig,
        health: watch::Receiver<HealthStatus>,
    ) {
        info!(fallback = %fallback.provider, "STT fallback enabled");
        self.stt_fallback = Some(SttFallback {
            config: fallback,
            health,
        });
    }

    pub fn set_reporter(&mut self, reporter: Arc<ResultReporter>) {
        self.reporter = Some(reporter);
    }

    pub fn set_analyzer(&mut self, analyzer: Analyzer) {
        self.analyzer = analyzer;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HarnessEvent> {
        self.events.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn factory(&self) -> Result<Arc<dyn ServiceFactory>> {
        self.factory.clone().ok_or(HarnessError::NotConfigured {
            component: "TestCoordinator",
        })
    }

    /// Run a single ad hoc text-input test
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_test(
        &mut self,
        stt_provider: &str,
        llm_provider: &str,
        llm_model: &str,
        tts_provider: &str,
        tts_voice: Option<&str>,
        utterance: &str,
        network_profile: NetworkProfile,
    ) -> Result<TestResult> {
        let mut tts = TtsTestConfig::new(tts_provider);
        tts.voice_id = tts_voice.map(str::to_string);

        let scenario = TestScenario {
            id: "adhoc".to_string(),
            name: "Ad Hoc".to_string(),
            description: "Single test".to_string(),
            scenario_type: ScenarioType::TextInput,
            repetitions: 1,
            user_utterance_audio_path: None,
            user_utterance_text: Some(utterance.to_string()),
            expected_response_type: ResponseType::default(),
        };
        let config = TestConfiguration {
            id: "config_adhoc".to_string(),
            scenario_name: scenario.name.clone(),
            repetition: 1,
            stt: SttTestConfig::new(stt_provider),
            llm: LlmTestConfig::new(llm_provider, llm_model),
            tts,
            audio_engine: AudioEngineTestConfig::default(),
            network_profile,
        };
        self.execute_scenario(&scenario, config).await
    }

    /// Execute one scenario under one configuration
    ///
    /// Returns `Err` only for configuration errors. Stage failures end up in
    /// the result's `errors`.
    pub async fn execute_scenario(
        &mut self,
        scenario: &TestScenario,
        config: TestConfiguration,
    ) -> Result<TestResult> {
        let factory = self.factory()?;
        let config_id = config.config_id();

        emit(
            &self.events,
            HarnessEvent::TestStarted {
                config_id: config_id.clone(),
                scenario_name: scenario.name.clone(),
                repetition: config.repetition,
            },
        );
        self.metrics.start_test(config.clone());

        if let Err(e) = self.run_pipeline(factory.as_ref(), scenario, &config).await {
            warn!(config_id = %config_id, scenario = %scenario.name, "Test failed: {}", e);
            self.metrics.record_error(e.to_string());
        }

        let result = self.metrics.finalize_test();
        let boxed = Box::new(result.clone());
        let event = if result.is_success() {
            HarnessEvent::TestComplete { result: boxed }
        } else {
            HarnessEvent::TestFailed { result: boxed }
        };
        emit(&self.events, event);
        Ok(result)
    }

    async fn run_pipeline(
        &mut self,
        factory: &dyn ServiceFactory,
        scenario: &TestScenario,
        config: &TestConfiguration,
    ) -> Result<()> {
        let text = scenario.user_utterance_text.clone().unwrap_or_default();

        if scenario.scenario_type == ScenarioType::TtsOnly {
            let tts = factory.create_tts(&config.tts)?;
            return self.synthesize(tts.as_ref(), &text, None).await;
        }

        let llm = factory.create_llm(&config.llm)?;
        let tts = factory.create_tts(&config.tts)?;

        let input = match (&scenario.scenario_type, &scenario.user_utterance_audio_path) {
            (ScenarioType::AudioInput, Some(path)) => {
                let mut stt = self.create_stt(factory, &config.stt)?;
                self.transcribe(stt.as_mut(), Path::new(path)).await?
            }
            _ => {
                if text.trim().is_empty() {
                    return Err(HarnessError::execution("input", "scenario has no utterance"));
                }
                UserInput {
                    text,
                    ended: PhaseTimer::start(),
                }
            }
        };

        let response = self.complete(llm.as_ref(), &input.text, &config.llm).await?;
        self.synthesize(tts.as_ref(), &response, Some(input.ended))
            .await
    }

    fn create_stt(
        &self,
        factory: &dyn ServiceFactory,
        config: &SttTestConfig,
    ) -> Result<Box<dyn SpeechToText>> {
        let primary = factory.create_stt(config)?;
        let Some(fallback) = &self.stt_fallback else {
            return Ok(primary);
        };
        let mut router = ProviderRouter::new();
        router.configure(
            primary,
            factory.create_stt(&fallback.config)?,
            fallback.health.clone(),
        );
        Ok(Box::new(router))
    }

    async fn transcribe(&mut self, stt: &mut dyn SpeechToText, path: &Path) -> Result<UserInput> {
        let audio = load_audio(path).await?;
        let limit = self.config.stage_timeout;
        let format = AudioFormat::pcm16_mono(STT_SAMPLE_RATE);
        let chunk_len = format.bytes_for_ms(self.config.audio_chunk_ms).max(1);

        // One deadline covers the whole session, from open to final transcript
        let session = with_timeout("stt", limit, async {
            let mut results = stt.start_streaming(format).await?;
            for chunk in audio.chunks(chunk_len) {
                stt.send_audio(chunk).await?;
            }

            let ended = PhaseTimer::start();
            stt.stop_streaming().await?;
            while let Some(item) = results.next().await {
                let item = item?;
                if item.is_final {
                    return Ok((item, ended.elapsed_ms(), ended));
                }
            }
            Err(HarnessError::execution(
                "stt",
                "stream ended without a final transcript",
            ))
        })
        .await;
        let (final_result, latency_ms, ended) = match session {
            Ok(session) => session,
            Err(e) => {
                let _ = stt.cancel_streaming().await;
                return Err(e);
            }
        };

        if final_result.transcript.trim().is_empty() {
            return Err(HarnessError::EmptyTranscript);
        }

        self.metrics.record_stt_latency(latency_ms);
        if let Some(confidence) = final_result.confidence {
            self.metrics.record_stt_confidence(confidence);
        }
        debug!(latency_ms, transcript = %final_result.transcript, "Transcription complete");
        emit(
            &self.events,
            HarnessEvent::SttComplete {
                latency_ms,
                transcript: final_result.transcript.clone(),
            },
        );

        Ok(UserInput {
            text: final_result.transcript,
            ended,
        })
    }

    /// Stream the completion, returning the full response text
    async fn complete(
        &mut self,
        llm: &dyn LanguageModel,
        prompt: &str,
        config: &LlmTestConfig,
    ) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.config.system_prompt {
            messages.push(LlmMessage::system(system.clone()));
        }
        messages.push(LlmMessage::user(prompt));

        let limit = self.config.stage_timeout;
        let metrics = &mut self.metrics;
        let events = &self.events;

        let mut response = String::new();
        let mut deltas = 0u32;
        let mut reported_tokens = None;

        let started = PhaseTimer::start();
        with_timeout("llm", limit, async {
            let mut stream = llm.stream_completion(&messages, config).await?;
            let mut first = true;
            while let Some(item) = stream.next().await {
                let token = item?;
                if token.content_delta.is_empty() {
                    continue;
                }
                if first {
                    first = false;
                    let ttfb_ms = started.elapsed_ms();
                    metrics.record_llm_ttfb(ttfb_ms);
                    emit(events, HarnessEvent::LlmFirstToken { ttfb_ms });
                }
                deltas += 1;
                if token.token_count.is_some() {
                    reported_tokens = token.token_count;
                }
                response.push_str(&token.content_delta);
            }
            Ok::<(), HarnessError>(())
        })
        .await?;

        if response.trim().is_empty() {
            return Err(HarnessError::execution("llm", "empty response"));
        }

        let completion_ms = started.elapsed_ms();
        let output_tokens = reported_tokens.unwrap_or(deltas);
        self.metrics.record_llm_completion(completion_ms);
        self.metrics
            .record_llm_tokens(Some(estimate_tokens(&messages)), output_tokens);
        emit(
            &self.events,
            HarnessEvent::LlmComplete {
                completion_ms,
                output_tokens,
            },
        );

        Ok(response.trim().to_string())
    }

    /// Synthesize `text`; E2E is stamped at the first audio byte
    async fn synthesize(
        &mut self,
        tts: &dyn TextToSpeech,
        text: &str,
        input_ended: Option<PhaseTimer>,
    ) -> Result<()> {
        if text.trim().is_empty() {
            return Err(HarnessError::execution("tts", "nothing to synthesize"));
        }

        let limit = self.config.stage_timeout;
        let metrics = &mut self.metrics;
        let events = &self.events;

        let mut audio_duration_ms = 0.0;
        let mut received_audio = false;

        let started = PhaseTimer::start();
        with_timeout("tts", limit, async {
            let mut stream = tts.synthesize(text).await?;
            while let Some(item) = stream.next().await {
                let chunk = item?;
                if !chunk.audio.is_empty() {
                    if !received_audio {
                        received_audio = true;
                        let ttfb_ms = started.elapsed_ms();
                        let e2e_ms = input_ended.map_or(ttfb_ms, |t| t.elapsed_ms());
                        metrics.record_tts_ttfb(ttfb_ms);
                        metrics.record_e2e(e2e_ms);
                        emit(events, HarnessEvent::TtsFirstByte { ttfb_ms });
                    }
                    audio_duration_ms += chunk.duration_ms();
                }
                if chunk.is_last {
                    break;
                }
            }
            Ok::<(), HarnessError>(())
        })
        .await?;

        if !received_audio {
            return Err(HarnessError::execution("tts", "no audio produced"));
        }

        let completion_ms = started.elapsed_ms();
        self.metrics.record_tts_completion(completion_ms);
        self.metrics.record_tts_audio_duration(audio_duration_ms);
        emit(
            &self.events,
            HarnessEvent::TtsComplete {
                completion_ms,
                audio_duration_ms,
            },
        );
        Ok(())
    }

    /// Execute every configuration of `definition` in order
    ///
    /// Invalid suites and a missing factory are fatal. Individual test
    /// failures are recorded and the suite moves on. The run is `Failed`
    /// only when every executed test failed.
    pub async fn execute_suite(&mut self, definition: &TestSuiteDefinition) -> Result<TestRun> {
        definition.validate()?;
        self.factory()?;

        let configurations = definition.generate_configurations();
        let mut run = TestRun::new(
            &definition.id,
            &definition.name,
            &self.config.client_id,
            configurations.len(),
        );
        run.client_type = self.config.client_type;
        run.status = RunStatus::Running;
        self.cancel.reset();

        info!(
            run_id = %run.id,
            suite = %definition.name,
            total = configurations.len(),
            "Starting test run"
        );

        for config in configurations {
            if self.cancel.is_cancelled() {
                warn!(
                    run_id = %run.id,
                    completed = run.completed_configurations,
                    "Run cancelled"
                );
                run.finish(RunStatus::Cancelled);
                break;
            }

            let Some(scenario) = definition.scenario(&config.scenario_name) else {
                warn!(scenario = %config.scenario_name, "Scenario not found");
                continue;
            };

            let result = self.execute_scenario(scenario, config).await?;
            if let Some(reporter) = &self.reporter {
                reporter.enqueue(&run.id, result.clone());
            }
            run.push_result(result);

            debug!(
                run_id = %run.id,
                progress_percent = run.progress_percent(),
                "Configuration complete"
            );
            emit(
                &self.events,
                HarnessEvent::RunProgress {
                    run_id: run.id.clone(),
                    completed: run.completed_configurations,
                    total: run.total_configurations,
                },
            );
        }

        if !run.status.is_terminal() {
            let all_failed = !run.results.is_empty() && run.successful_results().next().is_none();
            if all_failed {
                error!(run_id = %run.id, "Every test in the run failed");
                run.finish(RunStatus::Failed);
            } else {
                run.finish(RunStatus::Completed);
            }
        }

        info!(
            run_id = %run.id,
            status = ?run.status,
            results = run.results.len(),
            "Test run finished"
        );
        Ok(run)
    }

    pub fn analyze(&self, run: &TestRun) -> AnalysisReport {
        self.analyzer.analyze(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{SimulatedServiceFactory, SimulationProfile};
    use crate::suite::quick_validation_suite;

    fn configured(factory: SimulatedServiceFactory) -> TestCoordinator {
        let mut coordinator = TestCoordinator::new(CoordinatorConfig {
            stage_timeout: Duration::from_secs(2),
            sample_interval: Duration::from_millis(10),
            ..Default::default()
        });
        coordinator.configure(Arc::new(factory));
        assert!(coordinator.is_configured());
        coordinator
    }

    fn fast() -> SimulatedServiceFactory {
        SimulatedServiceFactory::new(SimulationProfile::fast())
    }

    fn scenario(scenario_type: ScenarioType, audio: Option<String>) -> TestScenario {
        TestScenario {
            id: "s".to_string(),
            name: "Scenario".to_string(),
            description: String::new(),
            scenario_type,
            repetitions: 1,
            user_utterance_audio_path: audio,
            user_utterance_text: Some("What is photosynthesis?".to_string()),
            expected_response_type: ResponseType::Short,
        }
    }

    fn configuration() -> TestConfiguration {
        quick_validation_suite().generate_configurations().remove(0)
    }

    #[tokio::test]
    async fn test_unconfigured_coordinator_is_fatal() {
        let mut coordinator = TestCoordinator::new(CoordinatorConfig::default());
        assert!(!coordinator.is_configured());
        let err = coordinator
            .execute_test("deepgram", "anthropic", "m", "chatterbox", None, "hi", NetworkProfile::Localhost)
            .await
            .unwrap_err();
        assert!(err.is_configuration());

        let err = coordinator
            .execute_suite(&quick_validation_suite())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::NotConfigured { .. }));
    }

    #[tokio::test]
    async fn test_text_input_pipeline() {
        let mut coordinator = configured(fast());
        let result = coordinator
            .execute_test(
                "deepgram",
                "anthropic",
                "claude-3-5-haiku-20241022",
                "chatterbox",
                Some("narrator"),
                "What is the capital of France?",
                NetworkProfile::CellularUs,
            )
            .await
            .unwrap();

        assert!(result.is_success(), "errors: {:?}", result.errors);
        assert!(result.stt_latency_ms.is_none());
        assert!(result.llm_ttfb_ms > 0.0);
        assert!(result.llm_completion_ms >= result.llm_ttfb_ms);
        assert!(result.tts_ttfb_ms > 0.0);
        assert!(result.e2e_latency_ms >= result.llm_completion_ms);
        assert!(result.tts_audio_duration_ms.unwrap() > 0.0);
        assert!(result.llm_output_tokens.unwrap() > 0);
        assert!(result.llm_input_tokens.unwrap() > 0);
        assert_eq!(result.network_profile, NetworkProfile::CellularUs);
        assert_eq!(
            result.tts_config.as_ref().unwrap().voice_id.as_deref(),
            Some("narrator")
        );
        assert!(result.network_projections.contains_key("cellular_us"));
    }

    #[tokio::test]
    async fn test_audio_input_measures_stt() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // 500 ms of 16 kHz mono PCM16
        std::fs::write(file.path(), vec![0u8; 16_000]).unwrap();

        let mut coordinator = configured(fast());
        let scenario = scenario(
            ScenarioType::AudioInput,
            Some(file.path().to_string_lossy().into_owned()),
        );
        let result = coordinator
            .execute_scenario(&scenario, configuration())
            .await
            .unwrap();

        assert!(result.is_success(), "errors: {:?}", result.errors);
        assert!(result.stt_latency_ms.unwrap() > 0.0);
        assert!(result.stt_confidence.is_some());
        assert!(result.e2e_latency_ms >= result.stt_latency_ms.unwrap());
    }

    #[tokio::test]
    async fn test_audio_input_without_path_uses_text() {
        let mut coordinator = configured(fast());
        let result = coordinator
            .execute_scenario(&scenario(ScenarioType::AudioInput, None), configuration())
            .await
            .unwrap();
        assert!(result.is_success());
        assert!(result.stt_latency_ms.is_none());
    }

    #[tokio::test]
    async fn test_missing_audio_file_is_recorded() {
        let mut coordinator = configured(fast());
        let scenario = scenario(
            ScenarioType::AudioInput,
            Some("/nonexistent/utterance.wav".to_string()),
        );
        let result = coordinator
            .execute_scenario(&scenario, configuration())
            .await
            .unwrap();
        assert!(!result.is_success());
        assert!(result.errors[0].starts_with("IO error"));
    }

    #[tokio::test]
    async fn test_tts_only_e2e_equals_ttfb() {
        let mut coordinator = configured(fast());
        let result = coordinator
            .execute_scenario(&scenario(ScenarioType::TtsOnly, None), configuration())
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.llm_ttfb_ms, 0.0);
        assert_eq!(result.e2e_latency_ms, result.tts_ttfb_ms);
    }

    #[tokio::test]
    async fn test_provider_creation_failure_is_recorded() {
        let mut coordinator = configured(fast().with_unavailable_provider("anthropic"));
        let wall = PhaseTimer::start();
        let result = coordinator
            .execute_scenario(&scenario(ScenarioType::TextInput, None), configuration())
            .await
            .unwrap();
        let wall_ms = wall.elapsed_ms();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("Failed to create llm provider 'anthropic'"));

        // No first audio byte: e2e falls back to the test's own wall time
        assert!(result.e2e_latency_ms >= 0.0);
        assert!(
            result.e2e_latency_ms <= wall_ms,
            "e2e {} wall {}",
            result.e2e_latency_ms,
            wall_ms
        );
        assert!(wall_ms - result.e2e_latency_ms < 50.0);
    }

    #[tokio::test]
    async fn test_stalled_stage_times_out() {
        let mut coordinator = TestCoordinator::new(CoordinatorConfig {
            stage_timeout: Duration::from_millis(500),
            sample_interval: Duration::from_millis(10),
            ..Default::default()
        });
        coordinator.configure(Arc::new(fast().with_stalled_stream("chatterbox")));

        let started = PhaseTimer::start();
        let result = coordinator
            .execute_scenario(&scenario(ScenarioType::TextInput, None), configuration())
            .await
            .unwrap();
        assert_eq!(result.errors, vec!["tts timed out after 500ms".to_string()]);
        assert_eq!(result.tts_ttfb_ms, 0.0);
        // The stalled stage is bounded by a single deadline
        assert!(started.elapsed_ms() < 1_500.0);
        // LLM completed before the stall
        assert!(result.llm_completion_ms > 0.0);
    }

    #[tokio::test]
    async fn test_broken_stream_keeps_partial_timings() {
        let mut coordinator = configured(fast().with_broken_stream("anthropic"));
        let result = coordinator
            .execute_scenario(&scenario(ScenarioType::TextInput, None), configuration())
            .await
            .unwrap();
        assert!(!result.is_success());
        assert!(result.llm_ttfb_ms > 0.0);
        assert_eq!(result.tts_ttfb_ms, 0.0);
    }

    #[tokio::test]
    async fn test_stt_fallback_follows_health() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), vec![0u8; 3_200]).unwrap();
        let scenario = scenario(
            ScenarioType::AudioInput,
            Some(file.path().to_string_lossy().into_owned()),
        );

        for (status, succeeds) in [(HealthStatus::Healthy, false), (HealthStatus::Unhealthy, true)] {
            let mut coordinator = configured(fast().with_broken_stream("deepgram"));
            let (_tx, rx) = watch::channel(status);
            coordinator.set_stt_fallback(SttTestConfig::new("apple"), rx);

            let result = coordinator
                .execute_scenario(&scenario, configuration())
                .await
                .unwrap();
            assert_eq!(result.is_success(), succeeds, "{status}: {:?}", result.errors);
        }
    }

    #[tokio::test]
    async fn test_suite_runs_every_configuration() {
        let mut coordinator = configured(fast());
        let mut events = coordinator.subscribe();

        let run = coordinator
            .execute_suite(&quick_validation_suite())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.results.len(), 3);
        assert_eq!(run.completed_configurations, 3);
        assert_eq!(run.progress_percent(), 100.0);
        assert!(run.completed_at.is_some());

        let mut started = 0;
        let mut progress = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                HarnessEvent::TestStarted { .. } => started += 1,
                HarnessEvent::RunProgress { completed, .. } => progress.push(completed),
                _ => {}
            }
        }
        assert_eq!(started, 3);
        assert_eq!(progress, vec![1, 2, 3]);

        let report = coordinator.analyze(&run);
        assert_eq!(report.best_configurations.len(), 1);
        assert_eq!(report.best_configurations[0].sample_count, 3);
    }

    #[tokio::test]
    async fn test_suite_continues_past_failures() {
        let mut suite = quick_validation_suite();
        suite
            .parameter_space
            .tts_configs
            .push(TtsTestConfig::new("piper"));
        let mut coordinator = configured(fast().with_unavailable_provider("piper"));

        let run = coordinator.execute_suite(&suite).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.results.len(), 6);
        assert_eq!(run.successful_results().count(), 3);
    }

    #[tokio::test]
    async fn test_suite_fails_when_every_test_fails() {
        let mut coordinator = configured(fast().with_unavailable_provider("chatterbox"));
        let run = coordinator
            .execute_suite(&quick_validation_suite())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.results.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_suite_is_fatal() {
        let mut suite = quick_validation_suite();
        suite.network_profiles.clear();
        let err = configured(fast()).execute_suite(&suite).await.unwrap_err();
        assert!(matches!(err, HarnessError::InvalidSuite(_)));
    }

    #[tokio::test]
    async fn test_cancel_between_configurations() {
        let mut suite = quick_validation_suite();
        suite.scenarios[0].repetitions = 20;
        let mut coordinator = configured(fast());
        let cancel = coordinator.cancel_handle();
        let mut events = coordinator.subscribe();

        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if matches!(event, HarnessEvent::RunProgress { completed: 1, .. }) {
                    cancel.cancel();
                    break;
                }
            }
        });

        let run = coordinator.execute_suite(&suite).await.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.results.len() < 20);
        assert!(!run.results.is_empty());
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(&[LlmMessage::user("")]), 1);
        assert_eq!(
            estimate_tokens(&[LlmMessage::system("abcd"), LlmMessage::user("abcdefgh")]),
            3
        );
    }
}
