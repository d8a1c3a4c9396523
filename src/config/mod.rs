pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::tags::{ExtractorLimits, ToolStreaming, DEFAULT_MAX_PAYLOAD_BYTES};

/// Env var naming the YAML config file.
pub const CONFIG_PATH_ENV: &str = "TAGPROXY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_FIREWORKS_BASE_URL: &str = "https://api.fireworks.ai/inference/v1";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Upstream request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default)]
    pub http_use_env_proxy: bool,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            base_path: String::new(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
            http_use_env_proxy: false,
        }
    }
}

/// The single OpenAI-compatible provider requests are forwarded to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// When unset, the client's `Authorization` header is forwarded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            proxy: None,
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Stream tool-call arguments while the tag is still open.
    #[serde(default)]
    pub stream_tool_arguments: bool,
    #[serde(default = "default_max_tag_payload_bytes")]
    pub max_tag_payload_bytes: usize,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_max_tag_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            stream_tool_arguments: false,
            max_tag_payload_bytes: default_max_tag_payload_bytes(),
        }
    }
}

impl FeaturesConfig {
    #[must_use]
    pub fn extractor_limits(&self) -> ExtractorLimits {
        ExtractorLimits {
            max_payload_bytes: self.max_tag_payload_bytes,
        }
    }

    #[must_use]
    pub fn tool_streaming(&self) -> ToolStreaming {
        if self.stream_tool_arguments {
            ToolStreaming::Incremental
        } else {
            ToolStreaming::Buffered
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_yaml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load the optional YAML file at `path`, apply environment overrides read
/// through `lookup`, then validate.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file exists but cannot be read or parsed,
/// when an override has an invalid value, or when validation fails.
pub fn load_config_with_env<F>(path: &str, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => AppConfig::default(),
        Ok(contents) => serde_yaml::from_str(&contents)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(err) => return Err(err.into()),
    };
    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config)?;
    Ok(config)
}

/// Apply `OPENAI_API_KEY`, `FIREWORKS_API_KEY`, `OPENAI_BASE_URL`, `HOST`,
/// `PORT` and `LOG_LEVEL`. Empty values count as unset.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when `PORT` is not a valid port.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    let openai_key = get("OPENAI_API_KEY");
    let fireworks_key = get("FIREWORKS_API_KEY");
    let fireworks_only = fireworks_key.is_some() && openai_key.is_none();
    if let Some(key) = fireworks_key.or(openai_key) {
        config.upstream.api_key = Some(key);
    }

    if let Some(base_url) = get("OPENAI_BASE_URL") {
        config.upstream.base_url = base_url;
    } else if fireworks_only && config.upstream.base_url == DEFAULT_OPENAI_BASE_URL {
        config.upstream.base_url = DEFAULT_FIREWORKS_BASE_URL.to_string();
    }

    if let Some(host) = get("HOST") {
        config.server.host = host;
    }
    if let Some(port) = get("PORT") {
        config.server.port = port.trim().parse().map_err(|_| {
            ConfigError::Validation(format!("PORT must be a valid port number, got '{port}'"))
        })?;
    }
    if let Some(level) = get("LOG_LEVEL") {
        config.features.log_level = level;
    }
    Ok(())
}
