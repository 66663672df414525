use std::collections::HashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_transport_config(config)?;
    validate_providers(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_transport_config(config: &AppConfig) -> Result<(), ConfigError> {
    let transport = &config.transport;
    if transport.pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "transport.pool_max_idle_per_host must be greater than 0",
        ));
    }
    if transport.connect_timeout_secs == 0 {
        return Err(validation_err(
            "transport.connect_timeout_secs must be greater than 0",
        ));
    }
    validate_proxy_url(transport.proxy.as_deref())
}

fn validate_proxy_url(proxy: Option<&str>) -> Result<(), ConfigError> {
    let Some(proxy) = proxy.map(str::trim) else {
        return Ok(());
    };
    if proxy.is_empty() {
        return Err(validation_err("transport.proxy cannot be empty when set"));
    }
    let parsed = url::Url::parse(proxy)
        .map_err(|err| validation_err(format!("transport.proxy is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(
            "transport.proxy must use http:// or https://",
        ));
    }
    Ok(())
}

fn validate_providers(config: &AppConfig) -> Result<(), ConfigError> {
    if config.providers.is_empty() {
        return Err(validation_err("providers cannot be empty"));
    }

    let mut names = HashSet::new();
    for provider in &config.providers {
        if provider.name.trim().is_empty() {
            return Err(validation_err("provider name cannot be empty"));
        }
        if !names.insert(provider.name.as_str()) {
            return Err(validation_err(format!(
                "duplicate provider name '{}'",
                provider.name
            )));
        }
        if let Some(base_url) = provider.base_url.as_deref() {
            let parsed = url::Url::parse(base_url.trim()).map_err(|err| {
                validation_err(format!(
                    "Provider '{}': base_url is not a valid URL: {err}",
                    provider.name
                ))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(validation_err(format!(
                    "Provider '{}': base_url must start with http:// or https://",
                    provider.name
                )));
            }
        }
        if provider.dialect.requires_api_key() && provider.api_key.trim().is_empty() {
            return Err(validation_err(format!(
                "Provider '{}': api_key cannot be empty for {}",
                provider.name, provider.dialect
            )));
        }
        for model in &provider.models {
            if model.trim().is_empty() {
                return Err(validation_err(format!(
                    "Provider '{}': model name cannot be empty",
                    provider.name
                )));
            }
        }
    }

    let defaults = config.providers.iter().filter(|p| p.is_default).count();
    if defaults > 1 {
        return Err(validation_err(format!(
            "at most one provider may be default, found {defaults}"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
