use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Bot identity ──────────────────────────────────────────────────────────────

/// Persona settings woven into the system prompt and the canned replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub name: String,
    pub company: String,
    pub role: String,
    pub experience_years: u32,
    /// Reply for empty or whitespace-only messages.
    pub greeting: String,
    /// Reply when the request fails or runs past the request timeout.
    pub apology: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "MESH".to_string(),
            company: "Wfinance".to_string(),
            role: "analista sênior de BPO Financeiro".to_string(),
            experience_years: 5,
            greeting: "Oi! Em que posso ajudar?".to_string(),
            apology: "Tive um problema técnico. Pode tentar novamente?".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for one inbound message, skills and completion included.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3978,
            request_timeout_secs: 25,
        }
    }
}

// ── Completion providers ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureOpenAiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

impl Default for AzureOpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            deployment: String::new(),
            api_version: "2024-06-01".to_string(),
        }
    }
}

impl AzureOpenAiConfig {
    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty()
            && !self.api_key.trim().is_empty()
            && !self.deployment.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

impl OpenAiConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Per-provider call budget.  A provider that exceeds it is abandoned and
    /// the next one in line is tried.
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub azure: AzureOpenAiConfig,
    pub openai: OpenAiConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            max_tokens: 800,
            temperature: 0.7,
            azure: AzureOpenAiConfig::default(),
            openai: OpenAiConfig::default(),
        }
    }
}

// ── Memory ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// `"memory"` keeps everything in-process; `"eventlog"` also appends every
    /// turn and learning event to `event_log_path` and replays it on startup.
    pub backend: String,
    pub event_log_path: String,
    /// Turns kept per user.  Oldest turns are evicted first.
    pub max_history: usize,
    pub max_input_chars: usize,
    pub max_output_chars: usize,
    /// Number of most recent turns the profile is derived from.
    pub profile_window: usize,
    /// Profiles are left at their defaults until a user has this many turns.
    pub min_turns_for_analysis: usize,
    /// Unprocessed learning events that trigger a batch fold into profiles.
    pub learning_batch_threshold: usize,
    /// Successful uses of one skill before it is listed as a common task.
    pub common_task_threshold: u32,
    pub retention_days: i64,
    pub cleanup_interval_hours: u64,
    /// IANA timezone used when bucketing activity into peak hours.
    /// Falls back to UTC when the name is unrecognised.
    pub timezone: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            event_log_path: ".mesh/memory/events.jsonl".to_string(),
            max_history: 50,
            max_input_chars: 1000,
            max_output_chars: 2000,
            profile_window: 20,
            min_turns_for_analysis: 3,
            learning_batch_threshold: 5,
            common_task_threshold: 3,
            retention_days: 7,
            cleanup_interval_hours: 24,
            timezone: "America/Sao_Paulo".to_string(),
        }
    }
}

impl MemoryConfig {
    pub fn uses_event_log(&self) -> bool {
        self.backend.eq_ignore_ascii_case("eventlog")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        config.apply_env_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Overlay deployment secrets and ports from the environment.  Empty
    /// values are ignored so a blank `.env` line never wipes a file setting.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("AZURE_OPENAI_ENDPOINT") {
            self.llm.azure.endpoint = value;
        }
        if let Some(value) = get("AZURE_OPENAI_API_KEY") {
            self.llm.azure.api_key = value;
        }
        if let Some(value) = get("AZURE_OPENAI_DEPLOYMENT") {
            self.llm.azure.deployment = value;
        }
        if let Some(value) = get("OPENAI_API_KEY") {
            self.llm.openai.api_key = value;
        }
        if let Some(value) = get("OPENAI_MODEL") {
            self.llm.openai.model = value;
        }
        if let Some(port) = get("PORT").and_then(|value| value.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(value) = get("LOG_LEVEL") {
            self.telemetry.log_level = value;
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Provider names in the order they will be tried, configured or not.
    pub fn provider_summary(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("azure", self.llm.azure.is_configured()),
            ("openai", self.llm.openai.is_configured()),
        ]
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
