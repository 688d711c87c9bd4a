use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::digest::window::PeriodWindows;
use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// `~/.mailpulse/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".mailpulse").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    let breaker = &config.breaker;
    if !(breaker.error_threshold_percent > 0.0 && breaker.error_threshold_percent <= 100.0) {
        return Err(invalid(format!(
            "breaker.error_threshold_percent must be in (0, 100], got {}",
            breaker.error_threshold_percent
        )));
    }
    if breaker.timeout_secs == 0 || breaker.reset_secs == 0 || breaker.rolling_window_secs == 0 {
        return Err(invalid(
            "breaker timeout, reset and rolling window must be non-zero",
        ));
    }
    if breaker.minimum_calls == 0 {
        return Err(invalid("breaker.minimum_calls must be at least 1"));
    }

    if config.provider.mailbox_scope.trim().is_empty() {
        return Err(invalid("provider.mailbox_scope must not be empty"));
    }
    if config.provider.thread_concurrency == 0 {
        return Err(invalid("provider.thread_concurrency must be at least 1"));
    }

    for (name, retry) in [
        ("provider.retry", &config.provider.retry),
        ("credentials.retry", &config.credentials.retry),
    ] {
        if retry.max_attempts == 0 {
            return Err(invalid(format!("{}.max_attempts must be at least 1", name)));
        }
        if retry.base_backoff_ms > retry.max_backoff_ms {
            return Err(invalid(format!(
                "{name}.base_backoff_ms must not exceed {name}.max_backoff_ms"
            )));
        }
    }
    // One refresh and one provider call retried to exhaustion fit in a breaker call.
    let retry_budget = RetryPolicy::from_config(&config.provider.retry).worst_case_delay()
        + RetryPolicy::from_config(&config.credentials.retry).worst_case_delay();
    if retry_budget >= Duration::from_secs(breaker.timeout_secs) {
        return Err(invalid(format!(
            "provider and credential retry backoff ({:?}) must stay under breaker.timeout_secs ({}s)",
            retry_budget, breaker.timeout_secs
        )));
    }

    if config.summarizer.max_attempts == 0 {
        return Err(invalid("summarizer.max_attempts must be at least 1"));
    }
    if config.summarizer.base_backoff_ms > config.summarizer.max_backoff_ms {
        return Err(invalid(
            "summarizer.base_backoff_ms must not exceed summarizer.max_backoff_ms",
        ));
    }

    // Parses and orders the period boundaries.
    PeriodWindows::from_config(&config.digest)?;
    if config.digest.default_timezone.parse::<Tz>().is_err() {
        return Err(ConfigError::InvalidTimezone {
            name: config.digest.default_timezone.clone(),
        });
    }

    if config.ledger.lease_secs == 0 || config.ledger.sweep_interval_secs == 0 {
        return Err(invalid("ledger lease and sweep interval must be non-zero"));
    }
    if config.ledger.max_attempts == 0 {
        return Err(invalid("ledger.max_attempts must be at least 1"));
    }

    let webhook = &config.webhook;
    if !webhook.path.starts_with('/') {
        return Err(invalid(format!(
            "webhook.path must start with '/', got '{}'",
            webhook.path
        )));
    }
    if !webhook.verify_bearer && webhook.allowed_domains.is_empty() {
        return Err(invalid(
            "webhook needs bearer verification or at least one allowed domain",
        ));
    }
    if webhook.verify_bearer && webhook.accepted_issuers.is_empty() {
        return Err(invalid("webhook.accepted_issuers must not be empty"));
    }

    Ok(())
}
