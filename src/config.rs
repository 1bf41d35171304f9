//! Runtime configuration for chat-relay.
//!
//! Configuration is loaded from a JSON file (missing fields fall back to
//! defaults) and then overridden from the environment, which is where API
//! keys are expected to come from.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::normalize::DEFAULT_MAX_LINE_BYTES;
use crate::relay::ErrorPolicy;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "chat-relay", about = "HTTP relay for local, DeepSeek and RagFlow chat backends")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Outbound HTTP client settings shared by every backend.
    pub upstream: UpstreamConfig,

    /// Local model runtime (Ollama).
    pub ollama: OllamaConfig,

    /// DeepSeek chat completions API.
    pub deepseek: DeepSeekConfig,

    /// RagFlow chat API.
    pub ragflow: RagflowConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,

    /// Allow any origin.
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            cors_permissive: true,
        }
    }
}

/// Outbound client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub connect_timeout_secs: u64,

    /// Total timeout for non-streaming calls.
    pub request_timeout_secs: u64,

    /// Maximum silence between two chunks of a streaming call.
    pub stream_idle_timeout_secs: u64,

    /// Raw chunks buffered between the reader task and the normalizer.
    pub channel_capacity: usize,

    /// Longest stream line accepted before the stream is failed.
    pub max_line_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
            stream_idle_timeout_secs: 60,
            channel_capacity: 32,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            api_key: None,
        }
    }
}

impl OllamaConfig {
    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepSeekConfig {
    pub base_url: String,
    pub api_key: String,
    pub default_model: String,
    pub system_prompt: String,

    /// How failures are surfaced to callers of the DeepSeek endpoints.
    pub error_policy: ErrorPolicy,
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            api_key: String::new(),
            default_model: "deepseek-chat".to_string(),
            system_prompt: crate::types::DEFAULT_SYSTEM_PROMPT.to_string(),
            error_policy: ErrorPolicy::EmbedInBody,
        }
    }
}

impl DeepSeekConfig {
    pub fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagflowConfig {
    /// Full completions URL, typically `.../api/v1/chats/{chat_id}/completions`.
    pub api_url: String,
    pub api_key: String,
}

impl Default for RagflowConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:9380/api/v1/chats/default/completions".to_string(),
            api_key: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            config
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DEEPSEEK_API_KEY") {
            self.deepseek.api_key = v;
        }
        if let Some(v) = get("DEEPSEEK_BASE_URL") {
            self.deepseek.base_url = v;
        }
        if let Some(v) = get("RAGFLOW_API_KEY") {
            self.ragflow.api_key = v;
        }
        if let Some(v) = get("RAGFLOW_API_URL") {
            self.ragflow.api_url = v;
        }
        if let Some(v) = get("OLLAMA_BASE_URL") {
            self.ollama.base_url = v;
        }
        if let Some(v) = get("OLLAMA_MODEL") {
            self.ollama.model = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let up = &self.upstream;
        if up.connect_timeout_secs == 0
            || up.request_timeout_secs == 0
            || up.stream_idle_timeout_secs == 0
        {
            anyhow::bail!("upstream timeouts must be greater than zero");
        }
        if up.channel_capacity == 0 {
            anyhow::bail!("upstream.channel_capacity must be greater than zero");
        }
        if up.max_line_bytes == 0 {
            anyhow::bail!("upstream.max_line_bytes must be greater than zero");
        }
        for (name, url) in [
            ("ollama.base_url", &self.ollama.base_url),
            ("deepseek.base_url", &self.deepseek.base_url),
            ("ragflow.api_url", &self.ragflow.api_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("{name} must be an http(s) URL, got {url:?}");
            }
        }
        Ok(())
    }
}
