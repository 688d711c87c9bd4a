pub mod loader;
pub mod schema;

pub use loader::{default_config_path, load_config, load_config_from_str, validate_config};
pub use schema::{
    BreakerConfig, Config, CredentialsConfig, DatabaseConfig, DigestConfig, LedgerConfig,
    LoggingConfig, ProviderConfig, RetryConfig, ServerConfig, SummarizerConfig, WebhookConfig,
};
