pub mod validation;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dispatch::{Dialect, ProviderAccess};
use crate::intake::TransmitterConfig;

use self::validation::validate_config;

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

/// Deployment posture. Debug echoing of dispatch bodies is only honored in
/// development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    Development,
    #[default]
    Production,
}

impl fmt::Display for Posture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Posture::Development => write!(f, "development"),
            Posture::Production => write!(f, "production"),
        }
    }
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub use_env_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

fn default_timeout_secs() -> u64 {
    600
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_pool_max_idle_per_host() -> usize {
    16
}
fn default_pool_idle_timeout_secs() -> u64 {
    15
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
            use_env_proxy: false,
            proxy: None,
        }
    }
}

/// One provider account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub dialect: Dialect,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ProviderConfig {
    /// Access descriptor handed to the dispatch builder.
    #[must_use]
    pub fn access(&self) -> ProviderAccess {
        ProviderAccess {
            dialect: self.dialect,
            api_key: self.api_key.trim().to_string(),
            base_url: self.base_url.clone(),
            api_version: self.api_version.clone(),
            extra_headers: self
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    fn serves_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub posture: Posture,
    #[serde(default)]
    pub transmitter_throttle_ms: u64,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            posture: Posture::default(),
            transmitter_throttle_ms: 0,
        }
    }
}

impl FeaturesConfig {
    #[must_use]
    pub fn transmitter(&self) -> TransmitterConfig {
        TransmitterConfig::from_throttle_ms(self.transmitter_throttle_ms)
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Pick the provider for an invocation.
    ///
    /// An explicit name wins. Otherwise the first provider listing `model`
    /// is used, then the default provider, then the first one.
    #[must_use]
    pub fn resolve_provider(&self, name: Option<&str>, model: Option<&str>) -> Option<&ProviderConfig> {
        if let Some(name) = name {
            return self.providers.iter().find(|p| p.name == name);
        }
        if let Some(model) = model {
            if let Some(provider) = self.providers.iter().find(|p| p.serves_model(model)) {
                return Some(provider);
            }
        }
        self.providers
            .iter()
            .find(|p| p.is_default)
            .or_else(|| self.providers.first())
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
