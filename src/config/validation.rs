use super::{ClientConfig, ConfigError, StatusClassification};

/// Validate the client config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    validate_base_url(config)?;
    validate_paths(config)?;
    validate_timeouts(config)?;
    validate_status_keywords(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_base_url(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.base_url.trim().is_empty() {
        return Err(validation_err("base_url cannot be empty"));
    }
    let parsed = url::Url::parse(&config.base_url)
        .map_err(|err| validation_err(format!("base_url is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err("base_url must use http:// or https://"));
    }
    Ok(())
}

fn validate_paths(config: &ClientConfig) -> Result<(), ConfigError> {
    for (name, path) in [
        ("stream_path", &config.stream_path),
        ("fallback_path", &config.fallback_path),
    ] {
        if path.trim().is_empty() {
            return Err(validation_err(format!("{name} cannot be empty")));
        }
    }
    if config.stream_path == config.fallback_path {
        return Err(validation_err(
            "stream_path and fallback_path must point at different endpoints",
        ));
    }
    Ok(())
}

fn validate_timeouts(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.request_timeout_secs == 0 {
        return Err(validation_err("request_timeout_secs must be greater than 0"));
    }
    if config.connect_timeout_secs == 0 {
        return Err(validation_err("connect_timeout_secs must be greater than 0"));
    }
    if config.connect_timeout_secs > config.request_timeout_secs {
        return Err(validation_err(
            "connect_timeout_secs cannot exceed request_timeout_secs",
        ));
    }
    if config.progress_tick_ms < 10 {
        return Err(validation_err("progress_tick_ms must be at least 10"));
    }
    Ok(())
}

fn validate_status_keywords(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.status_classification != StatusClassification::Keywords {
        return Ok(());
    }
    if config.status_image_keywords.is_empty() {
        return Err(validation_err(
            "status_image_keywords cannot be empty when status_classification is keywords",
        ));
    }
    if config
        .status_image_keywords
        .iter()
        .any(|keyword| keyword.trim().is_empty())
    {
        return Err(validation_err("status_image_keywords contains an empty keyword"));
    }
    Ok(())
}

fn validate_log_level(config: &ClientConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
