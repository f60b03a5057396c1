//! Configuration for the chat relay gateway.

use std::collections::HashMap;
use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    /// API keys keyed by lowercase provider name (`moonshot`, `glm`, ...).
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Outbound connection to the inference service.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    /// Dial timeout. Kept short so an unreachable upstream fails fast.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Client-level ceiling on a whole upstream call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
    #[serde(default = "default_tcp_keepalive")]
    pub tcp_keepalive_secs: u64,
    /// Maximum number of error-body bytes kept when the upstream rejects a call.
    #[serde(default = "default_error_snippet_bytes")]
    pub error_snippet_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            tcp_keepalive_secs: default_tcp_keepalive(),
            error_snippet_bytes: default_error_snippet_bytes(),
        }
    }
}

/// Timing of a single relay session.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Hard ceiling on end-to-end generation time.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Per-read deadline on the upstream body. `0` disables it.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Number of frames buffered between the session and the response body.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            total_timeout_secs: default_total_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            read_timeout_secs: default_read_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamConfig {
    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_secs > 0).then(|| Duration::from_secs(self.read_timeout_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Path to the `models.json` catalogue.
    #[serde(default = "default_models_path")]
    pub path: String,
    /// Preferred default model id; falls back to the catalogue's own default.
    #[serde(default)]
    pub default_model: Option<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            path: default_models_path(),
            default_model: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Comma-separated allowed origins, or `*`.
    #[serde(default = "default_cors_origins")]
    pub origins: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: default_cors_origins(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_upstream_url() -> String {
    "http://localhost:8000/api/chat/stream".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    6000
}
fn default_pool_max_idle() -> usize {
    20
}
fn default_pool_idle_timeout() -> u64 {
    60
}
fn default_tcp_keepalive() -> u64 {
    30
}
fn default_error_snippet_bytes() -> usize {
    1024
}
fn default_total_timeout() -> u64 {
    300
}
fn default_heartbeat_interval() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    30
}
fn default_channel_capacity() -> usize {
    64
}
fn default_models_path() -> String {
    "config/models.json".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_cors_origins() -> String {
    "*".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            stream: StreamConfig::default(),
            models: ModelsConfig::default(),
            api_keys: HashMap::new(),
            logging: LoggingConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (GATEWAY__SECTION__KEY format)
    /// 2. Plain `<NAME>_API_KEY` variables, for keys only
    /// 3. config.toml file (if present)
    /// 4. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::load_from("config")?;
        Ok(config.with_env_api_keys(std::env::vars()))
    }

    /// Load configuration from the given file stem plus `GATEWAY__*` variables.
    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Merge `<NAME>_API_KEY=value` pairs into `api_keys`.
    ///
    /// Keys already present (from the file or `GATEWAY__API_KEYS__*`) win.
    pub fn with_env_api_keys<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if value.trim().is_empty() {
                continue;
            }
            if let Some(key) = api_key_name(&name) {
                self.api_keys.entry(key).or_insert(value);
            }
        }
        self
    }

    /// Whether a non-blank API key is configured for `env_key`.
    ///
    /// Accepts either the variable name (`MOONSHOT_API_KEY`) or the bare
    /// provider name (`moonshot`).
    pub fn has_api_key(&self, env_key: &str) -> bool {
        let name = api_key_name(env_key).unwrap_or_else(|| env_key.to_lowercase());
        self.api_keys
            .get(&name)
            .is_some_and(|key| !key.trim().is_empty())
    }
}

/// `MOONSHOT_API_KEY` -> `moonshot`. Returns `None` for other variable names.
pub fn api_key_name(var: &str) -> Option<String> {
    let upper = var.to_uppercase();
    let stem = upper.strip_suffix("_API_KEY")?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_lowercase())
}
