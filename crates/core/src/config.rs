use config::{Config, ConfigError, Environment, File};
use secrecy::Secret;
use serde::Deserialize;
use std::path::PathBuf;

use crate::types::ProviderKind;

/// Top-level typed configuration record.
///
/// Sources are layered: built-in defaults, `config/default`, the
/// environment-specific file, `config/local`, then environment variables
/// with the `OPSMITH` prefix (e.g. `OPSMITH__SERVER__PORT=8080`).
/// Unknown keys in files are ignored rather than absorbed.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub scheduler: SchedulerConfig,
    pub memory: MemoryConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// Preferred provider name; must match an entry in `ordered_providers`.
    pub provider: Option<String>,
    /// Providers in fallback order.
    pub ordered_providers: Vec<ProviderEntry>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request timeout for provider round-trips.
    pub timeout_ms: u64,
    /// Hard upper bound on any per-request timeout.
    pub provider_max_timeout_ms: u64,
    /// Maximum provider attempts before giving up on a generation.
    pub max_fallbacks: u32,
    pub health_interval_secs: u64,
    pub health_timeout_ms: u64,
    /// Consecutive failed probes before a provider is marked unavailable.
    pub unavailable_after: u32,
    /// Jaccard similarity threshold for offline template matching.
    pub template_match_threshold: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            ordered_providers: vec![ProviderEntry {
                name: "ollama".into(),
                kind: ProviderKind::OllamaCompatible,
                endpoint: "http://localhost:11434".into(),
                api_key: None,
                model: "llama3.1:8b".into(),
                temperature: None,
                max_tokens: None,
            }],
            temperature: 0.1,
            max_tokens: 2048,
            timeout_ms: 30_000,
            provider_max_timeout_ms: 120_000,
            max_fallbacks: 3,
            health_interval_secs: 60,
            health_timeout_ms: 5_000,
            unavailable_after: 3,
            template_match_threshold: 0.3,
        }
    }
}

/// A single configured LLM provider backend.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderEntry {
    pub name: String,
    pub kind: ProviderKind,
    pub endpoint: String,
    pub api_key: Option<Secret<String>>,
    pub model: String,
    /// Per-provider overrides; the global values apply when absent.
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub history_max: usize,
    pub max_timeout_seconds: u64,
    pub resource_sample_interval_ms: u64,
    pub grace_period_ms: u64,
    pub aging_threshold_seconds: u64,
    /// Cap on captured bytes per output stream.
    pub max_captured_bytes: usize,
    /// Interval for the idle scheduler tick.
    pub idle_tick_ms: u64,
    /// When set, elevated-policy submissions must carry a confirm token.
    pub require_confirm_token_for_elevated: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            history_max: 500,
            max_timeout_seconds: 3600,
            resource_sample_interval_ms: 250,
            grace_period_ms: 2_000,
            aging_threshold_seconds: 300,
            max_captured_bytes: 1024 * 1024,
            idle_tick_ms: 1_000,
            require_confirm_token_for_elevated: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_conversations: usize,
    pub max_messages_per_conversation: usize,
    /// Messages of history included when assembling prompts.
    pub context_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_conversations: 100,
            max_messages_per_conversation: 50,
            context_window: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub personas: PathBuf,
    pub channels: PathBuf,
    pub scripts: PathBuf,
    pub logs: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            personas: PathBuf::from("personas"),
            channels: PathBuf::from("channels"),
            scripts: PathBuf::from("data/scripts"),
            logs: PathBuf::from("data/logs"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `stdout` or `stderr`.
    pub sink: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,opsmith=debug".into(),
            sink: "stdout".into(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("OPSMITH_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map OPSMITH__SERVER__PORT=8080 to server.port
            .add_source(Environment::with_prefix("OPSMITH").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
