//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use trunkline_types::{AudioFormat, CostTier, ProviderStrategy};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Engine tunables.
    #[serde(default)]
    pub engine: EngineSettings,

    /// Defaults applied to sessions created from inbound calls.
    #[serde(default)]
    pub session_defaults: SessionDefaults,

    /// Telephony carrier credentials.
    #[serde(default)]
    pub telephony: TelephonyConfig,

    /// Configured AI provider instances, in no particular order;
    /// `priority` governs selection.
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Publicly reachable base URL, used to build webhook and media
    /// stream URLs handed to carriers (and to verify Twilio signatures,
    /// which cover the full URL).
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "trunkline_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Engine tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Teardown timeout for pump cancellation, in seconds.
    #[serde(default = "default_teardown_timeout_secs")]
    pub teardown_timeout_secs: u64,

    /// Consecutive connect failures before a provider is unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long an unhealthy provider is excluded, in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Capacity of the per-session audio channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Session defaults for inbound calls.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionDefaults {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_audio_format")]
    pub audio_format: AudioFormat,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl SessionDefaults {
    pub fn to_session_config(&self) -> trunkline_types::SessionConfig {
        trunkline_types::SessionConfig {
            model: self.model.clone(),
            audio_format: self.audio_format,
            sample_rate: self.sample_rate,
            system_prompt: self.system_prompt.clone(),
            temperature: self.temperature,
            tools: Vec::new(),
        }
    }
}

/// Carrier credentials.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelephonyConfig {
    #[serde(default)]
    pub twilio: Option<TwilioSettings>,
    #[serde(default)]
    pub telnyx: Option<TelnyxSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioSettings {
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default = "default_true")]
    pub strict_signatures: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelnyxSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default = "default_true")]
    pub strict_signatures: bool,
}

/// One configured provider instance.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSpec {
    /// Unique instance name.
    pub name: String,
    /// Provider family label reported on sessions.
    pub kind: String,
    /// Behavioral contract.
    pub strategy: ProviderStrategy,
    /// Selection priority; lower is preferred.
    #[serde(default)]
    pub priority: u32,
    /// Operator kill switch.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Realtime endpoint URL (realtime strategy).
    #[serde(default)]
    pub url: Option<String>,
    /// Stage endpoints (segmented strategy).
    #[serde(default)]
    pub stt_url: Option<String>,
    #[serde(default)]
    pub llm_url: Option<String>,
    #[serde(default)]
    pub tts_url: Option<String>,
    /// API key; usually injected via environment.
    #[serde(default)]
    pub api_key: String,
    /// Capability declaration.
    #[serde(default = "default_formats")]
    pub audio_formats: Vec<AudioFormat>,
    #[serde(default)]
    pub sample_rates: Vec<u32>,
    #[serde(default = "default_true")]
    pub function_calling: bool,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u32,
    #[serde(default = "default_cost_tier")]
    pub cost_tier: CostTier,
}

impl ProviderSpec {
    pub fn capabilities(&self) -> trunkline_types::ProviderCapabilities {
        trunkline_types::ProviderCapabilities {
            audio_formats: self.audio_formats.clone(),
            sample_rates: self.sample_rates.clone(),
            streaming: true,
            function_calling: self.function_calling,
            max_context_tokens: self.max_context_tokens,
            cost_tier: self.cost_tier,
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3100
}

fn default_public_url() -> String {
    "http://localhost:3100".to_string()
}

fn default_db_path() -> String {
    "trunkline.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_teardown_timeout_secs() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_channel_capacity() -> usize {
    64
}

fn default_model() -> String {
    "realtime-voice-1".to_string()
}

fn default_audio_format() -> AudioFormat {
    AudioFormat::Pcm16
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_true() -> bool {
    true
}

fn default_formats() -> Vec<AudioFormat> {
    vec![AudioFormat::Pcm16]
}

fn default_max_context_tokens() -> u32 {
    128_000
}

fn default_cost_tier() -> CostTier {
    CostTier::Standard
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            teardown_timeout_secs: default_teardown_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            audio_format: default_audio_format(),
            sample_rate: default_sample_rate(),
            system_prompt: None,
            temperature: None,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides (secrets should come in this way
/// rather than living in the file):
/// - `TRUNKLINE_HOST` overrides `server.host`
/// - `TRUNKLINE_PORT` overrides `server.port`
/// - `TRUNKLINE_PUBLIC_URL` overrides `server.public_url`
/// - `TRUNKLINE_DB_PATH` overrides `database.path`
/// - `TRUNKLINE_LOG_LEVEL` overrides `logging.level`
/// - `TRUNKLINE_LOG_JSON` overrides `logging.json` (set to "true")
/// - `TRUNKLINE_TWILIO_AUTH_TOKEN` overrides `telephony.twilio.auth_token`
/// - `TRUNKLINE_TELNYX_API_KEY` overrides `telephony.telnyx.api_key`
/// - `TRUNKLINE_TELNYX_PUBLIC_KEY` overrides `telephony.telnyx.public_key`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Ok(host) = std::env::var("TRUNKLINE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("TRUNKLINE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(url) = std::env::var("TRUNKLINE_PUBLIC_URL") {
        config.server.public_url = url;
    }
    if let Ok(db_path) = std::env::var("TRUNKLINE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("TRUNKLINE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("TRUNKLINE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(token) = std::env::var("TRUNKLINE_TWILIO_AUTH_TOKEN") {
        if let Some(twilio) = &mut config.telephony.twilio {
            twilio.auth_token = token;
        }
    }
    if let Ok(key) = std::env::var("TRUNKLINE_TELNYX_API_KEY") {
        if let Some(telnyx) = &mut config.telephony.telnyx {
            telnyx.api_key = key;
        }
    }
    if let Ok(key) = std::env::var("TRUNKLINE_TELNYX_PUBLIC_KEY") {
        if let Some(telnyx) = &mut config.telephony.telnyx {
            telnyx.public_key = key;
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 3100);
        assert_eq!(config.engine.failure_threshold, 3);
        assert!(config.providers.is_empty());
        assert!(config.telephony.twilio.is_none());
    }

    #[test]
    fn parses_full_provider_section() {
        let toml = r#"
            [server]
            port = 4000
            public_url = "https://voice.example.com"

            [telephony.twilio]
            account_sid = "AC123"
            auth_token = "secret"

            [[providers]]
            name = "rt-primary"
            kind = "openai-realtime"
            strategy = "realtime"
            priority = 1
            url = "wss://realtime.example.com/v1"
            audio_formats = ["pcm16"]
            sample_rates = [24000]

            [[providers]]
            name = "seg-backup"
            kind = "pipeline"
            strategy = "segmented"
            priority = 2
            stt_url = "https://stt.example.com"
            llm_url = "https://llm.example.com"
            tts_url = "https://tts.example.com"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].strategy, ProviderStrategy::Realtime);
        assert_eq!(config.providers[1].strategy, ProviderStrategy::Segmented);
        assert!(config.providers[1].enabled);
        let caps = config.providers[0].capabilities();
        assert_eq!(caps.sample_rates, vec![24_000]);
    }
}
