//! Configuration loading, validation, and management for Maestro.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides (`MAESTRO_*`). Validates settings at startup.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Model provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Status/memory store (global tools API) configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Sub-agent gateway endpoints
    #[serde(default)]
    pub subagents: SubAgentConfig,

    /// HTTP gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Agent loop configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Idempotency guard configuration
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
}

/// Model provider settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key; usually supplied via MAESTRO_API_KEY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL for the provider API
    #[serde(default = "default_provider_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_provider_url(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

fn default_provider_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.5
}
fn default_provider_timeout() -> u64 {
    120
}

/// Status/memory store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the global tools API
    #[serde(default = "default_store_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,

    /// How many times to retry a failed status read
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,

    /// Base backoff between read retries, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_store_url(),
            timeout_secs: default_store_timeout(),
            read_retries: default_read_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_store_url() -> String {
    "http://127.0.0.1:8090".into()
}
fn default_store_timeout() -> u64 {
    30
}
fn default_read_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}

/// Sub-agent gateway endpoints. Each starts a long-running remote agent
/// and returns immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentConfig {
    /// Phone-call agent endpoint
    #[serde(default = "default_phone_url")]
    pub phone_url: String,

    /// WhatsApp agent endpoint
    #[serde(default = "default_whatsapp_url")]
    pub whatsapp_url: String,

    /// Browser-automation booking agent endpoint
    #[serde(default = "default_booking_url")]
    pub booking_url: String,

    /// Per-request timeout in seconds for start calls
    #[serde(default = "default_subagent_timeout")]
    pub timeout_secs: u64,
}

impl Default for SubAgentConfig {
    fn default() -> Self {
        Self {
            phone_url: default_phone_url(),
            whatsapp_url: default_whatsapp_url(),
            booking_url: default_booking_url(),
            timeout_secs: default_subagent_timeout(),
        }
    }
}

fn default_phone_url() -> String {
    "http://127.0.0.1:8091".into()
}
fn default_whatsapp_url() -> String {
    "http://127.0.0.1:8092".into()
}
fn default_booking_url() -> String {
    "http://127.0.0.1:8093".into()
}
fn default_subagent_timeout() -> u64 {
    60
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

/// Agent loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on model iterations per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Default wait duration in seconds for the loop's wait state
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,

    /// Consecutive model failures tolerated before the run fails
    #[serde(default = "default_model_retry_budget")]
    pub model_retry_budget: u32,

    /// Optional cap on consecutive wait states before the run fails.
    /// None leaves the counter diagnostic-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_wait_cap: Option<u32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            wait_secs: default_wait_secs(),
            model_retry_budget: default_model_retry_budget(),
            consecutive_wait_cap: None,
        }
    }
}

fn default_max_iterations() -> u32 {
    10
}
fn default_wait_secs() -> u64 {
    30
}
fn default_model_retry_budget() -> u32 {
    1
}

/// Idempotency guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// Duplicate-message suppression window in seconds
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window_secs: u64,

    /// Path to the sqlite database holding processed message ids.
    /// None keeps the set in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_db_path: Option<String>,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            duplicate_window_secs: default_duplicate_window(),
            processed_db_path: None,
        }
    }
}

fn default_duplicate_window() -> u64 {
    60
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("provider", &self.provider)
            .field("store", &self.store)
            .field("subagents", &self.subagents)
            .field("gateway", &self.gateway)
            .field("agent", &self.agent)
            .field("idempotency", &self.idempotency)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply environment
    /// overrides. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let mut config = match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => {
                toml::from_str(&contents).map_err(|e| format!("invalid config file: {e}"))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(format!("failed to read config file: {e}")),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `MAESTRO_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("MAESTRO_API_KEY")
            && !key.is_empty()
        {
            self.provider.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("MAESTRO_PROVIDER_URL")
            && !url.is_empty()
        {
            self.provider.base_url = url;
        }
        if let Ok(model) = std::env::var("MAESTRO_MODEL")
            && !model.is_empty()
        {
            self.provider.model = model;
        }
        if let Ok(url) = std::env::var("MAESTRO_STORE_URL")
            && !url.is_empty()
        {
            self.store.base_url = url;
        }
        if let Ok(port) = std::env::var("MAESTRO_GATEWAY_PORT")
            && let Ok(port) = port.parse()
        {
            self.gateway.port = port;
        }
    }

    /// Validate settings that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<(), String> {
        if self.agent.max_iterations == 0 {
            return Err("agent.max_iterations must be at least 1".into());
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(format!(
                "provider.temperature {} out of range 0.0-2.0",
                self.provider.temperature
            ));
        }
        for (name, url) in [
            ("store.base_url", &self.store.base_url),
            ("subagents.phone_url", &self.subagents.phone_url),
            ("subagents.whatsapp_url", &self.subagents.whatsapp_url),
            ("subagents.booking_url", &self.subagents.booking_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("{name} must start with http:// or https://"));
            }
        }
        Ok(())
    }
}
