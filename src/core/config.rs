use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::consensus::RetrievalMode;
use crate::core::error::EngineError;

/// Top-level configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Completion endpoint configuration
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Memory tier limits and storage location
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Consensus engine configuration
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Mission and reflection configuration
    #[serde(default)]
    pub mission: MissionConfig,

    /// Tick loop configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Emotion thresholds
    #[serde(default)]
    pub emotion: EmotionConfig,

    /// Request/response transcript files
    #[serde(default)]
    pub transcript: TranscriptConfig,
}

/// Completion service configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    /// Base URL of an OpenAI-compatible API (without /chat/completions)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model name to use
    #[serde(default = "default_model")]
    pub model: String,

    /// API key; falls back to CELLMIND_API_KEY when absent
    #[serde(default)]
    pub api_key: Option<String>,

    /// Temperature setting for generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Attempts per call before the error reaches the caller
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed pause between attempts
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Secondary target for consensus sub-agents
    #[serde(default)]
    pub fallback: Option<FallbackConfig>,
}

/// Secondary completion target
#[derive(Debug, Deserialize, Clone)]
pub struct FallbackConfig {
    /// Endpoint; the primary endpoint is reused when absent
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Model name
    pub model: String,
}

/// Memory configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    /// Directory holding the JSON mappings and the audit log
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_max_short_term")]
    pub max_short_term: usize,

    #[serde(default = "default_max_long_term")]
    pub max_long_term: usize,

    /// Upper bound on blobs produced by one long-term compression pass
    #[serde(default = "default_max_blobs")]
    pub max_blobs: usize,

    /// Long-term facts promoted back into short-term per key and tick
    #[serde(default = "default_reload_per_key")]
    pub reload_per_key: usize,

    /// Compressed blobs younger than this are left alone
    #[serde(default = "default_recompression_window_secs")]
    pub recompression_window_secs: u64,
}

/// Consensus configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ConsensusConfig {
    /// Responders spawned per consensus session
    #[serde(default = "default_sub_agent_count")]
    pub sub_agent_count: usize,

    /// Retrieval mode used by projects
    #[serde(default)]
    pub retrieval_mode: RetrievalMode,
}

/// Mission configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MissionConfig {
    /// Mission used when nothing has been persisted yet
    #[serde(default = "default_mission")]
    pub initial: String,

    /// Number of memory slices reflected on per tick
    #[serde(default = "default_reflection_count")]
    pub reflection_count: usize,
}

/// Scheduler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Pause between ticks
    #[serde(default = "default_tick_delay_ms")]
    pub tick_delay_ms: u64,

    /// A Curriculum cell runs on every tick divisible by this
    #[serde(default = "default_curriculum_every")]
    pub curriculum_every: u64,

    /// Stop after this many ticks; unbounded when absent
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

/// Emotion configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EmotionConfig {
    /// Emotion name to trigger level
    #[serde(default = "default_emotion_thresholds")]
    pub thresholds: BTreeMap<String, f32>,

    /// Amount every emotion fades per tick
    #[serde(default = "default_emotion_decay")]
    pub decay: f32,
}

/// Transcript configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TranscriptConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_transcript_dir")]
    pub log_dir: String,

    #[serde(default = "default_true")]
    pub include_full_prompts: bool,

    #[serde(default = "default_true")]
    pub include_full_responses: bool,

    #[serde(default = "default_log_files_to_keep")]
    pub log_files_to_keep: usize,
}

// Default values for optional configuration
fn default_endpoint() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> usize {
    512
}

fn default_timeout() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_max_short_term() -> usize {
    20
}

fn default_max_long_term() -> usize {
    50
}

fn default_max_blobs() -> usize {
    10
}

fn default_reload_per_key() -> usize {
    2
}

fn default_recompression_window_secs() -> u64 {
    3600
}

fn default_sub_agent_count() -> usize {
    5
}

fn default_mission() -> String {
    "Say as little as possible.".to_string()
}

fn default_reflection_count() -> usize {
    5
}

fn default_tick_delay_ms() -> u64 {
    5000
}

fn default_curriculum_every() -> u64 {
    10
}

fn default_emotion_thresholds() -> BTreeMap<String, f32> {
    let mut thresholds = BTreeMap::new();
    thresholds.insert("frustration".to_string(), 0.8);
    thresholds.insert("anxiety".to_string(), 0.8);
    thresholds
}

fn default_emotion_decay() -> f32 {
    0.1
}

fn default_transcript_dir() -> String {
    "./logs/llm".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_files_to_keep() -> usize {
    10
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            fallback: None,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_short_term: default_max_short_term(),
            max_long_term: default_max_long_term(),
            max_blobs: default_max_blobs(),
            reload_per_key: default_reload_per_key(),
            recompression_window_secs: default_recompression_window_secs(),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            sub_agent_count: default_sub_agent_count(),
            retrieval_mode: RetrievalMode::default(),
        }
    }
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            initial: default_mission(),
            reflection_count: default_reflection_count(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_delay_ms: default_tick_delay_ms(),
            curriculum_every: default_curriculum_every(),
            max_ticks: None,
        }
    }
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            thresholds: default_emotion_thresholds(),
            decay: default_emotion_decay(),
        }
    }
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: default_transcript_dir(),
            include_full_prompts: true,
            include_full_responses: true,
            log_files_to_keep: default_log_files_to_keep(),
        }
    }
}

impl CompletionConfig {
    /// API key from the file, else from the environment
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("CELLMIND_API_KEY").ok())
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::from_toml_str(&config_text)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)
            .map_err(|e| anyhow::anyhow!(EngineError::Config(e.to_string())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.consensus.sub_agent_count == 0 {
            return Err(EngineError::Config("consensus.sub_agent_count must be at least 1".into()).into());
        }
        if self.mission.reflection_count == 0 {
            return Err(EngineError::Config("mission.reflection_count must be at least 1".into()).into());
        }
        if self.memory.max_short_term == 0 {
            return Err(EngineError::Config("memory.max_short_term must be at least 1".into()).into());
        }
        Ok(())
    }

    /// Configuration for tests: tiny delays, no retries, no files
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.completion.max_retries = 1;
        config.completion.retry_backoff_ms = 1;
        config.completion.timeout_seconds = 5;
        config.scheduler.tick_delay_ms = 1;
        config.memory.reload_per_key = 0;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.consensus.sub_agent_count, 5);
        assert_eq!(config.consensus.retrieval_mode, RetrievalMode::Hybrid);
        assert_eq!(config.mission.reflection_count, 5);
        assert_eq!(config.completion.timeout_seconds, 15);
        assert_eq!(config.completion.max_retries, 5);
        assert_eq!(config.completion.retry_backoff_ms, 1000);
        assert_eq!(config.memory.recompression_window_secs, 3600);
        assert_eq!(config.scheduler.curriculum_every, 10);
        assert!(config.scheduler.max_ticks.is_none());
        assert_eq!(config.emotion.thresholds.get("frustration"), Some(&0.8));
    }

    #[test]
    fn test_sections_override_defaults() {
        let text = r#"
[completion]
endpoint = "http://example.test/v1"
model = "tiny"

[completion.fallback]
model = "backup"

[consensus]
sub_agent_count = 3
retrieval_mode = "ModelOnly"

[scheduler]
max_ticks = 4
"#;
        let config = Config::from_toml_str(text).unwrap();
        assert_eq!(config.completion.model, "tiny");
        assert_eq!(config.completion.fallback.as_ref().unwrap().model, "backup");
        assert!(config.completion.fallback.as_ref().unwrap().endpoint.is_none());
        assert_eq!(config.consensus.sub_agent_count, 3);
        assert_eq!(config.consensus.retrieval_mode, RetrievalMode::ModelOnly);
        assert_eq!(config.scheduler.max_ticks, Some(4));
        assert_eq!(config.memory.max_short_term, 20);
    }

    #[test]
    fn test_zero_sub_agents_rejected() {
        let err = Config::from_toml_str("[consensus]\nsub_agent_count = 0\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_from_file_reports_missing_path() {
        let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
