//! # Test Suite Definitions
//!
//! A suite is a set of scenarios crossed with a parameter space of provider
//! configurations and network profiles. Expanding a suite yields one
//! [`TestConfiguration`] per scenario repetition and parameter combination.
//!
//! Suites serialize to the same camelCase JSON the reporting backend uses, so a
//! suite file exported from the web console can be run unchanged.

use crate::error::{HarnessError, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Simulated network condition applied analytically during analysis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkProfile {
    #[value(name = "localhost")]
    Localhost,
    #[value(name = "wifi")]
    Wifi,
    #[value(name = "cellular_us")]
    CellularUs,
    #[value(name = "cellular_eu")]
    CellularEu,
    #[value(name = "intercontinental")]
    Intercontinental,
}

impl NetworkProfile {
    pub const ALL: [NetworkProfile; 5] = [
        NetworkProfile::Localhost,
        NetworkProfile::Wifi,
        NetworkProfile::CellularUs,
        NetworkProfile::CellularEu,
        NetworkProfile::Intercontinental,
    ];

    /// Expected one-way network overhead per remote hop, in milliseconds
    pub fn added_latency_ms(&self) -> f64 {
        match self {
            NetworkProfile::Localhost => 0.0,
            NetworkProfile::Wifi => 10.0,
            NetworkProfile::CellularUs => 50.0,
            NetworkProfile::CellularEu => 70.0,
            NetworkProfile::Intercontinental => 120.0,
        }
    }

    /// Wire identifier, also used as the key in projection maps
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkProfile::Localhost => "localhost",
            NetworkProfile::Wifi => "wifi",
            NetworkProfile::CellularUs => "cellular_us",
            NetworkProfile::CellularEu => "cellular_eu",
            NetworkProfile::Intercontinental => "intercontinental",
        }
    }
}

impl Default for NetworkProfile {
    fn default() -> Self {
        NetworkProfile::Localhost
    }
}

impl std::fmt::Display for NetworkProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    AudioInput,
    TextInput,
    TtsOnly,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Short,
    #[default]
    Medium,
    Long,
}

// Providers that run entirely on the client device.
const ON_DEVICE_STT: &[&str] = &["apple", "glm-asr-ondevice", "web-speech"];
const ON_DEVICE_LLM: &[&str] = &["mlx"];
const ON_DEVICE_TTS: &[&str] = &["apple", "web-speech"];

fn default_language() -> String {
    "en-US".to_string()
}
fn default_max_tokens() -> u32 {
    512
}
fn default_temperature() -> f64 {
    0.7
}
fn default_true() -> bool {
    true
}
fn default_speed() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SttTestConfig {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub chunk_size_ms: Option<u32>,
    #[serde(default = "default_language")]
    pub language: String,
}

impl SttTestConfig {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: None,
            chunk_size_ms: None,
            language: default_language(),
        }
    }

    pub fn requires_network(&self) -> bool {
        stt_requires_network(&self.provider)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmTestConfig {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default = "default_true")]
    pub stream: bool,
}

impl LlmTestConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: None,
            stream: true,
        }
    }

    pub fn requires_network(&self) -> bool {
        llm_requires_network(&self.provider)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsTestConfig {
    pub provider: String,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default = "default_true")]
    pub use_streaming: bool,
}

impl TtsTestConfig {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            voice_id: None,
            speed: default_speed(),
            use_streaming: true,
        }
    }

    pub fn requires_network(&self) -> bool {
        tts_requires_network(&self.provider)
    }
}

pub fn stt_requires_network(provider: &str) -> bool {
    !ON_DEVICE_STT.contains(&provider)
}

pub fn llm_requires_network(provider: &str) -> bool {
    !ON_DEVICE_LLM.contains(&provider)
}

pub fn tts_requires_network(provider: &str) -> bool {
    !ON_DEVICE_TTS.contains(&provider)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioEngineTestConfig {
    pub sample_rate: f64,
    pub buffer_size: u32,
    pub vad_threshold: f64,
    pub vad_smoothing_window: u32,
}

impl Default for AudioEngineTestConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000.0,
            buffer_size: 1024,
            vad_threshold: 0.5,
            vad_smoothing_window: 5,
        }
    }
}

/// One benchmarkable (STT, LLM, TTS, audio, network) combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConfiguration {
    pub id: String,
    pub scenario_name: String,
    pub repetition: u32,
    pub stt: SttTestConfig,
    pub llm: LlmTestConfig,
    pub tts: TtsTestConfig,
    #[serde(default)]
    pub audio_engine: AudioEngineTestConfig,
    #[serde(default)]
    pub network_profile: NetworkProfile,
}

impl TestConfiguration {
    /// Identifier shared by every repetition of the same provider stack
    pub fn config_id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.stt.provider, self.llm.provider, self.llm.model, self.tts.provider
        )
    }

    /// Number of pipeline stages that cross the network
    pub fn network_hops(&self) -> u32 {
        [
            self.stt.requires_network(),
            self.llm.requires_network(),
            self.tts.requires_network(),
        ]
        .iter()
        .filter(|&&hop| hop)
        .count() as u32
    }
}

fn default_repetitions() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestScenario {
    pub id: String,
    pub name: String,
    pub description: String,
    pub scenario_type: ScenarioType,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    #[serde(default)]
    pub user_utterance_audio_path: Option<String>,
    #[serde(default)]
    pub user_utterance_text: Option<String>,
    #[serde(default)]
    pub expected_response_type: ResponseType,
}

fn default_audio_configs() -> Vec<AudioEngineTestConfig> {
    vec![AudioEngineTestConfig::default()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpace {
    pub stt_configs: Vec<SttTestConfig>,
    pub llm_configs: Vec<LlmTestConfig>,
    pub tts_configs: Vec<TtsTestConfig>,
    #[serde(default = "default_audio_configs")]
    pub audio_configs: Vec<AudioEngineTestConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub scenarios: Vec<TestScenario>,
    pub network_profiles: Vec<NetworkProfile>,
    pub parameter_space: ParameterSpace,
}

impl TestSuiteDefinition {
    /// Load a suite from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let suite: Self = serde_json::from_str(&data)?;
        suite.validate()?;
        Ok(suite)
    }

    /// Reject suites that expand to nothing
    pub fn validate(&self) -> Result<()> {
        if self.scenarios.is_empty() {
            return Err(HarnessError::InvalidSuite(format!(
                "suite '{}' has no scenarios",
                self.id
            )));
        }
        if self.network_profiles.is_empty() {
            return Err(HarnessError::InvalidSuite(format!(
                "suite '{}' has no network profiles",
                self.id
            )));
        }
        let space = &self.parameter_space;
        if space.stt_configs.is_empty()
            || space.llm_configs.is_empty()
            || space.tts_configs.is_empty()
            || space.audio_configs.is_empty()
        {
            return Err(HarnessError::InvalidSuite(format!(
                "suite '{}' has an empty parameter dimension",
                self.id
            )));
        }
        Ok(())
    }

    pub fn scenario(&self, name: &str) -> Option<&TestScenario> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    /// Expand the full cartesian product into concrete configurations
    pub fn generate_configurations(&self) -> Vec<TestConfiguration> {
        let mut configs = Vec::with_capacity(self.total_test_count());
        let mut index = 0usize;
        let space = &self.parameter_space;

        for scenario in &self.scenarios {
            for stt in &space.stt_configs {
                for llm in &space.llm_configs {
                    for tts in &space.tts_configs {
                        for audio in &space.audio_configs {
                            for &network_profile in &self.network_profiles {
                                for repetition in 1..=scenario.repetitions {
                                    index += 1;
                                    configs.push(TestConfiguration {
                                        id: format!("config_{}", index),
                                        scenario_name: scenario.name.clone(),
                                        repetition,
                                        stt: stt.clone(),
                                        llm: llm.clone(),
                                        tts: tts.clone(),
                                        audio_engine: audio.clone(),
                                        network_profile,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }

        configs
    }

    pub fn total_test_count(&self) -> usize {
        let reps: usize = self.scenarios.iter().map(|s| s.repetitions as usize).sum();
        let space = &self.parameter_space;
        reps * space.stt_configs.len()
            * space.llm_configs.len()
            * space.tts_configs.len()
            * space.audio_configs.len()
            * self.network_profiles.len()
    }
}

/// Built-in suite presets
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SuitePreset {
    /// Fast sanity check for CI pipelines
    #[value(name = "quick")]
    QuickValidation,
    /// Cross-provider comparison over several networks
    #[value(name = "comparison")]
    ProviderComparison,
}

impl SuitePreset {
    pub fn build(&self) -> TestSuiteDefinition {
        match self {
            SuitePreset::QuickValidation => quick_validation_suite(),
            SuitePreset::ProviderComparison => provider_comparison_suite(),
        }
    }
}

pub fn quick_validation_suite() -> TestSuiteDefinition {
    TestSuiteDefinition {
        id: "quick_validation".to_string(),
        name: "Quick Validation".to_string(),
        description: "Fast sanity check for CI/CD pipelines".to_string(),
        scenarios: vec![TestScenario {
            id: "short_response".to_string(),
            name: "Short Response".to_string(),
            description: "Brief Q&A exchange".to_string(),
            scenario_type: ScenarioType::TextInput,
            repetitions: 3,
            user_utterance_audio_path: None,
            user_utterance_text: Some("What is the capital of France?".to_string()),
            expected_response_type: ResponseType::Short,
        }],
        network_profiles: vec![NetworkProfile::Localhost],
        parameter_space: ParameterSpace {
            stt_configs: vec![SttTestConfig::new("deepgram")],
            llm_configs: vec![LlmTestConfig::new("anthropic", "claude-3-5-haiku-20241022")],
            tts_configs: vec![TtsTestConfig::new("chatterbox")],
            audio_configs: default_audio_configs(),
        },
    }
}

pub fn provider_comparison_suite() -> TestSuiteDefinition {
    TestSuiteDefinition {
        id: "provider_comparison".to_string(),
        name: "Provider Comparison".to_string(),
        description: "Compare all available providers".to_string(),
        scenarios: vec![
            TestScenario {
                id: "short_response".to_string(),
                name: "Short Response".to_string(),
                description: "Brief Q&A exchange".to_string(),
                scenario_type: ScenarioType::TextInput,
                repetitions: 10,
                user_utterance_audio_path: None,
                user_utterance_text: Some("What is photosynthesis?".to_string()),
                expected_response_type: ResponseType::Short,
            },
            TestScenario {
                id: "medium_response".to_string(),
                name: "Medium Response".to_string(),
                description: "Moderate explanation".to_string(),
                scenario_type: ScenarioType::TextInput,
                repetitions: 5,
                user_utterance_audio_path: None,
                user_utterance_text: Some("Explain how the human heart works.".to_string()),
                expected_response_type: ResponseType::Medium,
            },
        ],
        network_profiles: vec![
            NetworkProfile::Localhost,
            NetworkProfile::Wifi,
            NetworkProfile::CellularUs,
        ],
        parameter_space: ParameterSpace {
            stt_configs: vec![
                SttTestConfig::new("deepgram"),
                SttTestConfig::new("assemblyai"),
                SttTestConfig::new("apple"),
            ],
            llm_configs: vec![
                LlmTestConfig::new("anthropic", "claude-3-5-haiku-20241022"),
                LlmTestConfig::new("openai", "gpt-4o-mini"),
                LlmTestConfig::new("selfhosted", "qwen2.5:7b"),
            ],
            tts_configs: vec![
                TtsTestConfig::new("chatterbox"),
                TtsTestConfig::new("vibevoice"),
                TtsTestConfig::new("apple"),
            ],
            audio_configs: default_audio_configs(),
        },
    }
}
