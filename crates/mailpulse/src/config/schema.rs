use serde::{Deserialize, Serialize};

use crate::secrets::SecretSource;

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub digest: DigestConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            webhook: WebhookConfig::default(),
            breaker: BreakerConfig::default(),
            credentials: CredentialsConfig::default(),
            provider: ProviderConfig::default(),
            summarizer: SummarizerConfig::default(),
            digest: DigestConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Falls back to `~/.mailpulse/data/mailpulse.db` when unset.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_path")]
    pub path: String,
    /// Verify `Authorization: Bearer` push tokens.
    #[serde(default = "default_true")]
    pub verify_bearer: bool,
    #[serde(default = "default_issuers")]
    pub accepted_issuers: Vec<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub service_account_email: Option<String>,
    /// Delivery domains accepted without a bearer token.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default = "default_token_info_url")]
    pub token_info_url: String,
}

fn default_webhook_path() -> String {
    "/webhooks/mailbox-notifications".to_string()
}

fn default_issuers() -> Vec<String> {
    vec![
        "https://accounts.google.com".to_string(),
        "accounts.google.com".to_string(),
    ]
}

fn default_token_info_url() -> String {
    "https://oauth2.googleapis.com/tokeninfo".to_string()
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            path: default_webhook_path(),
            verify_bearer: true,
            accepted_issuers: default_issuers(),
            audience: None,
            service_account_email: None,
            allowed_domains: Vec::new(),
            token_info_url: default_token_info_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_error_threshold")]
    pub error_threshold_percent: f64,
    #[serde(default = "default_thirty")]
    pub timeout_secs: u64,
    #[serde(default = "default_thirty")]
    pub reset_secs: u64,
    #[serde(default = "default_rolling_window")]
    pub rolling_window_secs: u64,
    /// Calls required in the window before the error rate is evaluated.
    #[serde(default = "default_minimum_calls")]
    pub minimum_calls: u32,
}

fn default_error_threshold() -> f64 {
    50.0
}

fn default_thirty() -> u64 {
    30
}

fn default_rolling_window() -> u64 {
    10
}

fn default_minimum_calls() -> u32 {
    6
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_percent: default_error_threshold(),
            timeout_secs: 30,
            reset_secs: 30,
            rolling_window_secs: default_rolling_window(),
            minimum_calls: default_minimum_calls(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: SecretSource,
    #[serde(default = "default_refresh_buffer")]
    pub refresh_buffer_secs: u64,
    /// Retries when the token endpoint is unreachable or answers 5xx.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_refresh_buffer() -> u64 {
    300
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            token_url: default_token_url(),
            client_id: String::new(),
            client_secret: SecretSource::env("MAILPULSE_CLIENT_SECRET"),
            refresh_buffer_secs: default_refresh_buffer(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the mailbox bridge that fronts the mail provider.
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Label a message must carry to be considered, e.g. `INBOX`.
    #[serde(default = "default_mailbox_scope")]
    pub mailbox_scope: String,
    #[serde(default = "default_thread_concurrency")]
    pub thread_concurrency: usize,
    /// Retries for rate limits and provider outages.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider_base_url() -> String {
    "http://127.0.0.1:8790".to_string()
}

fn default_mailbox_scope() -> String {
    "INBOX".to_string()
}

fn default_thread_concurrency() -> usize {
    4
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            request_timeout_secs: default_request_timeout(),
            mailbox_scope: default_mailbox_scope(),
            thread_concurrency: default_thread_concurrency(),
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded backoff for a downstream. Attempts include the first call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub max_backoff_ms: u64,
}

fn default_retry_base_ms() -> u64 {
    250
}

fn default_retry_max_ms() -> u64 {
    2_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_retry_base_ms(),
            max_backoff_ms: default_retry_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// OpenAI-compatible chat completions URL. Keyword fallback when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: SecretSource,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

fn default_request_timeout() -> u64 {
    20
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: default_model(),
            api_key: SecretSource::default(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    /// The first half runs from local midnight to `split`.
    #[serde(default = "default_split")]
    pub split: String,
    #[serde(default = "default_second_half_end")]
    pub second_half_end: String,
    #[serde(default = "default_cache_duration")]
    pub cache_duration_hours: u32,
    /// Used for accounts whose timezone is missing or unknown.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

fn default_split() -> String {
    "07:00".to_string()
}

fn default_second_half_end() -> String {
    "16:00".to_string()
}

fn default_cache_duration() -> u32 {
    24
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            split: default_split(),
            second_half_end: default_second_half_end(),
            cache_duration_hours: default_cache_duration(),
            default_timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Total attempts per notification id, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_lease_secs() -> u64 {
    120
}

fn default_sweep_interval() -> u64 {
    30
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
            sweep_interval_secs: default_sweep_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}
