//! # Pipeline Service Contracts
//!
//! The harness treats speech recognition, language models and speech synthesis
//! as opaque streaming services. Each contract here is the minimum the
//! coordinator needs to time a stage; concrete providers live behind a
//! [`ServiceFactory`].
//!
//! All streams are `'static` boxed streams of `Result` items so a provider can
//! report a mid-stream failure without tearing the stream down first.

use crate::error::{HarnessError, Result};
use crate::suite::{LlmTestConfig, SttTestConfig, TtsTestConfig};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub mod simulated;

pub use simulated::{SimulatedServiceFactory, SimulationProfile};

/// Stream returned by every service call
pub type ServiceStream<T> = BoxStream<'static, Result<T>>;

/// Sample encoding for raw audio buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    Pcm16,
    Float32,
    Mulaw,
}

impl AudioEncoding {
    pub fn bytes_per_sample(&self) -> u32 {
        match self {
            AudioEncoding::Pcm16 => 2,
            AudioEncoding::Float32 => 4,
            AudioEncoding::Mulaw => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: AudioEncoding,
}

impl AudioFormat {
    pub fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            encoding: AudioEncoding::Pcm16,
        }
    }

    pub fn bytes_per_frame(&self) -> u32 {
        self.encoding.bytes_per_sample() * self.channels as u32
    }

    /// Playback duration of `byte_len` bytes in this format
    pub fn duration_ms(&self, byte_len: usize) -> f64 {
        let bytes_per_second = self.bytes_per_frame() as f64 * self.sample_rate as f64;
        if bytes_per_second == 0.0 {
            return 0.0;
        }
        byte_len as f64 / bytes_per_second * 1000.0
    }

    /// Bytes covering `ms` of audio, rounded down to a whole frame
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        let frames = self.sample_rate as u64 * ms as u64 / 1000;
        (frames * self.bytes_per_frame() as u64) as usize
    }
}

/// Partial or final transcription
#[derive(Debug, Clone, PartialEq)]
pub struct SttResult {
    pub transcript: String,
    pub is_final: bool,
    pub confidence: Option<f64>,
    pub is_end_of_utterance: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::System,
            content: content.into(),
        }
    }
}

/// One streamed completion delta
///
/// `token_count`, when present, is the provider-reported cumulative output
/// token count so far.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmToken {
    pub content_delta: String,
    pub token_count: Option<u32>,
}

/// One synthesized audio buffer
#[derive(Debug, Clone, PartialEq)]
pub struct TtsChunk {
    pub audio: Vec<u8>,
    pub format: AudioFormat,
    pub is_last: bool,
}

impl TtsChunk {
    pub fn duration_ms(&self) -> f64 {
        self.format.duration_ms(self.audio.len())
    }
}

/// Streaming speech recognition session
///
/// One session at a time: `start_streaming`, any number of `send_audio`, then
/// `stop_streaming` (flush and finish) or `cancel_streaming` (abandon).
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn start_streaming(&mut self, format: AudioFormat) -> Result<ServiceStream<SttResult>>;

    async fn send_audio(&mut self, chunk: &[u8]) -> Result<()>;

    async fn stop_streaming(&mut self) -> Result<()>;

    async fn cancel_streaming(&mut self) -> Result<()>;

    /// Stable name for logs and results
    fn identifier(&self) -> String;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream_completion(
        &self,
        messages: &[LlmMessage],
        config: &LlmTestConfig,
    ) -> Result<ServiceStream<LlmToken>>;

    fn identifier(&self) -> String;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<ServiceStream<TtsChunk>>;

    fn identifier(&self) -> String;
}

/// Creates provider instances for a configuration
///
/// Creation failures are reported as [`HarnessError::ProviderCreation`] so the
/// coordinator can record them against the affected scenario.
pub trait ServiceFactory: Send + Sync {
    fn create_stt(&self, config: &SttTestConfig) -> Result<Box<dyn SpeechToText>>;

    fn create_llm(&self, config: &LlmTestConfig) -> Result<Box<dyn LanguageModel>>;

    fn create_tts(&self, config: &TtsTestConfig) -> Result<Box<dyn TextToSpeech>>;
}

/// Adapt a channel into a [`ServiceStream`]; the stream ends when every
/// sender is dropped.
pub fn channel_stream<T: Send + 'static>(rx: mpsc::Receiver<Result<T>>) -> ServiceStream<T> {
    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

pub(crate) fn creation_error(
    kind: &'static str,
    provider: &str,
    reason: impl Into<String>,
) -> HarnessError {
    HarnessError::ProviderCreation {
        kind,
        provider: provider.to_string(),
        reason: reason.into(),
    }
}
