//! In-process stand-ins for real providers.
//!
//! Each simulated service sleeps for a provider-specific base latency with
//! seeded random jitter, so suite runs are reproducible for a given seed.
//! Failures can be injected per provider name for exercising error paths.

use super::{
    channel_stream, creation_error, AudioFormat, LanguageModel, LlmMessage, LlmToken,
    ServiceFactory, ServiceStream, SpeechToText, SttResult, TextToSpeech, TtsChunk,
};
use crate::error::{HarnessError, Result};
use crate::suite::{LlmTestConfig, SttTestConfig, TtsTestConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

const TTS_CHUNK_MS: u32 = 100;
const TTS_SAMPLE_RATE: u32 = 24_000;
const MS_PER_SPOKEN_WORD: f64 = 350.0;

const CANNED_RESPONSE: &str = "Plants capture sunlight with chlorophyll and use that energy to \
    turn water and carbon dioxide into glucose, releasing oxygen as a by-product. The glucose \
    fuels growth, and the oxygen is what we breathe.";

/// Timing knobs for simulated providers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationProfile {
    /// Multiplier applied to every delay; below 1.0 speeds runs up
    pub time_scale: f64,
    /// Maximum relative jitter, e.g. 0.15 for +/-15%
    pub jitter: f64,
    pub seed: u64,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            jitter: 0.15,
            seed: 42,
        }
    }
}

impl SimulationProfile {
    /// Profile for tests: delays scaled down 50x
    pub fn fast() -> Self {
        Self {
            time_scale: 0.02,
            ..Self::default()
        }
    }
}

fn stt_base_ms(provider: &str) -> f64 {
    match provider {
        "deepgram" => 180.0,
        "assemblyai" => 250.0,
        "groq" => 150.0,
        "apple" => 90.0,
        "glm-asr-ondevice" => 120.0,
        "web-speech" => 200.0,
        _ => 200.0,
    }
}

fn llm_ttft_ms(provider: &str) -> f64 {
    match provider {
        "anthropic" => 320.0,
        "openai" => 280.0,
        "selfhosted" => 150.0,
        "mlx" => 110.0,
        _ => 300.0,
    }
}

fn llm_per_token_ms(provider: &str) -> f64 {
    match provider {
        "anthropic" => 12.0,
        "openai" => 10.0,
        "selfhosted" => 20.0,
        "mlx" => 25.0,
        _ => 15.0,
    }
}

fn tts_ttfb_ms(provider: &str) -> f64 {
    match provider {
        "chatterbox" => 140.0,
        "vibevoice" => 180.0,
        "elevenlabs-flash" => 110.0,
        "elevenlabs-turbo" => 150.0,
        "piper" => 70.0,
        "apple" => 40.0,
        "web-speech" => 60.0,
        _ => 150.0,
    }
}

#[derive(Clone)]
struct Timing {
    profile: SimulationProfile,
    rng: Arc<Mutex<StdRng>>,
}

impl Timing {
    fn delay(&self, base_ms: f64) -> Duration {
        let jitter = self.profile.jitter.abs();
        let factor = 1.0 + self.rng.lock().gen_range(-jitter..=jitter);
        Duration::from_secs_f64((base_ms * factor * self.profile.time_scale).max(0.0) / 1000.0)
    }
}

/// Failure injected into a simulated provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// Stream yields one item, then an error
    Broken,
    /// Stream never produces its first item
    Stall,
}

/// Factory producing simulated providers for any provider name
pub struct SimulatedServiceFactory {
    timing: Timing,
    transcript: String,
    unavailable: HashSet<String>,
    faults: Vec<(String, Fault)>,
}

impl SimulatedServiceFactory {
    pub fn new(profile: SimulationProfile) -> Self {
        Self {
            timing: Timing {
                profile,
                rng: Arc::new(Mutex::new(StdRng::seed_from_u64(profile.seed))),
            },
            transcript: "What is photosynthesis?".to_string(),
            unavailable: HashSet::new(),
            faults: Vec::new(),
        }
    }

    /// Transcript every simulated STT session returns
    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = transcript.into();
        self
    }

    /// Creating any service for `provider` fails
    pub fn with_unavailable_provider(mut self, provider: impl Into<String>) -> Self {
        self.unavailable.insert(provider.into());
        self
    }

    /// Streams from `provider` fail after their first item
    pub fn with_broken_stream(mut self, provider: impl Into<String>) -> Self {
        self.faults.push((provider.into(), Fault::Broken));
        self
    }

    /// Streams from `provider` never start
    pub fn with_stalled_stream(mut self, provider: impl Into<String>) -> Self {
        self.faults.push((provider.into(), Fault::Stall));
        self
    }

    fn fault(&self, provider: &str) -> Option<Fault> {
        self.faults
            .iter()
            .find(|(name, _)| name == provider)
            .map(|(_, fault)| *fault)
    }

    fn check_available(&self, kind: &'static str, provider: &str) -> Result<()> {
        if self.unavailable.contains(provider) {
            return Err(creation_error(kind, provider, "provider unavailable"));
        }
        Ok(())
    }
}

impl ServiceFactory for SimulatedServiceFactory {
    fn create_stt(&self, config: &SttTestConfig) -> Result<Box<dyn SpeechToText>> {
        self.check_available("stt", &config.provider)?;
        Ok(Box::new(SimulatedStt::new(
            &config.provider,
            self.transcript.clone(),
            self.timing.clone(),
            self.fault(&config.provider),
        )))
    }

    fn create_llm(&self, config: &LlmTestConfig) -> Result<Box<dyn LanguageModel>> {
        self.check_available("llm", &config.provider)?;
        Ok(Box::new(SimulatedLlm {
            provider: config.provider.clone(),
            timing: self.timing.clone(),
            fault: self.fault(&config.provider),
        }))
    }

    fn create_tts(&self, config: &TtsTestConfig) -> Result<Box<dyn TextToSpeech>> {
        self.check_available("tts", &config.provider)?;
        Ok(Box::new(SimulatedTts {
            provider: config.provider.clone(),
            timing: self.timing.clone(),
            fault: self.fault(&config.provider),
        }))
    }
}

struct SttSession {
    results: mpsc::Sender<Result<SttResult>>,
    bytes_received: usize,
}

/// Simulated streaming recognizer returning a fixed transcript
pub struct SimulatedStt {
    provider: String,
    transcript: String,
    timing: Timing,
    fault: Option<Fault>,
    session: Option<SttSession>,
}

impl SimulatedStt {
    fn new(provider: &str, transcript: String, timing: Timing, fault: Option<Fault>) -> Self {
        Self {
            provider: provider.to_string(),
            transcript,
            timing,
            fault,
            session: None,
        }
    }
}

#[async_trait]
impl SpeechToText for SimulatedStt {
    async fn start_streaming(&mut self, _format: AudioFormat) -> Result<ServiceStream<SttResult>> {
        if self.session.is_some() {
            return Err(HarnessError::execution("stt", "session already active"));
        }
        let (tx, rx) = mpsc::channel(32);
        self.session = Some(SttSession {
            results: tx,
            bytes_received: 0,
        });
        Ok(channel_stream(rx))
    }

    async fn send_audio(&mut self, chunk: &[u8]) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| HarnessError::execution("stt", "no active session"))?;
        let first = session.bytes_received == 0;
        session.bytes_received += chunk.len();

        if first {
            let partial = self
                .transcript
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            let _ = session
                .results
                .send(Ok(SttResult {
                    transcript: partial,
                    is_final: false,
                    confidence: None,
                    is_end_of_utterance: false,
                }))
                .await;
        }
        Ok(())
    }

    async fn stop_streaming(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let delay = self.timing.delay(stt_base_ms(&self.provider));
        let transcript = self.transcript.clone();
        let confidence = 0.9 + self.timing.rng.lock().gen_range(0.0..0.09);
        let fault = self.fault;
        trace!(provider = %self.provider, bytes = session.bytes_received, "Simulated STT flushing");

        tokio::spawn(async move {
            match fault {
                Some(Fault::Stall) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                Some(Fault::Broken) => {
                    let _ = session
                        .results
                        .send(Err(HarnessError::execution("stt", "connection reset")))
                        .await;
                }
                None => {
                    tokio::time::sleep(delay).await;
                    let _ = session
                        .results
                        .send(Ok(SttResult {
                            transcript,
                            is_final: true,
                            confidence: Some(confidence),
                            is_end_of_utterance: true,
                        }))
                        .await;
                }
            }
        });
        Ok(())
    }

    async fn cancel_streaming(&mut self) -> Result<()> {
        self.session = None;
        Ok(())
    }

    fn identifier(&self) -> String {
        format!("simulated-stt:{}", self.provider)
    }
}

struct SimulatedLlm {
    provider: String,
    timing: Timing,
    fault: Option<Fault>,
}

#[async_trait]
impl LanguageModel for SimulatedLlm {
    async fn stream_completion(
        &self,
        messages: &[LlmMessage],
        config: &LlmTestConfig,
    ) -> Result<ServiceStream<LlmToken>> {
        if messages.is_empty() {
            return Err(HarnessError::execution("llm", "no messages"));
        }

        let words: Vec<String> = CANNED_RESPONSE
            .split_whitespace()
            .take(config.max_tokens.max(1) as usize)
            .map(|w| format!("{} ", w))
            .collect();
        let first_delay = self.timing.delay(llm_ttft_ms(&self.provider));
        let gaps: Vec<Duration> = (1..words.len())
            .map(|_| self.timing.delay(llm_per_token_ms(&self.provider)))
            .collect();
        let fault = self.fault;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            if fault == Some(Fault::Stall) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return;
            }
            tokio::time::sleep(first_delay).await;
            let total = words.len() as u32;
            for (i, word) in words.into_iter().enumerate() {
                if i > 0 {
                    if fault == Some(Fault::Broken) {
                        let _ = tx
                            .send(Err(HarnessError::execution("llm", "stream interrupted")))
                            .await;
                        return;
                    }
                    tokio::time::sleep(gaps[i - 1]).await;
                }
                let last = i as u32 + 1 == total;
                let token = LlmToken {
                    content_delta: word,
                    token_count: last.then_some(total),
                };
                if tx.send(Ok(token)).await.is_err() {
                    return;
                }
            }
        });
        Ok(channel_stream(rx))
    }

    fn identifier(&self) -> String {
        format!("simulated-llm:{}", self.provider)
    }
}

struct SimulatedTts {
    provider: String,
    timing: Timing,
    fault: Option<Fault>,
}

#[async_trait]
impl TextToSpeech for SimulatedTts {
    async fn synthesize(&self, text: &str) -> Result<ServiceStream<TtsChunk>> {
        let word_count = text.split_whitespace().count();
        if word_count == 0 {
            return Err(HarnessError::execution("tts", "nothing to synthesize"));
        }

        let format = AudioFormat::pcm16_mono(TTS_SAMPLE_RATE);
        let audio_ms = word_count as f64 * MS_PER_SPOKEN_WORD;
        let chunk_count = (audio_ms / TTS_CHUNK_MS as f64).ceil().max(1.0) as usize;
        let chunk_bytes = format.bytes_for_ms(TTS_CHUNK_MS);
        let first_delay = self.timing.delay(tts_ttfb_ms(&self.provider));
        // Synthesis runs roughly ten times faster than playback.
        let gap = self.timing.delay(TTS_CHUNK_MS as f64 / 10.0);
        let fault = self.fault;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            if fault == Some(Fault::Stall) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return;
            }
            tokio::time::sleep(first_delay).await;
            for i in 0..chunk_count {
                if i > 0 {
                    if fault == Some(Fault::Broken) {
                        let _ = tx
                            .send(Err(HarnessError::execution("tts", "synthesis aborted")))
                            .await;
                        return;
                    }
                    tokio::time::sleep(gap).await;
                }
                let chunk = TtsChunk {
                    audio: vec![0u8; chunk_bytes],
                    format,
                    is_last: i + 1 == chunk_count,
                };
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });
        Ok(channel_stream(rx))
    }

    fn identifier(&self) -> String {
        format!("simulated-tts:{}", self.provider)
    }
}
