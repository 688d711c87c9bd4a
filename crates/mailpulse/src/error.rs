use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderError;
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum MailpulseError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Credential refresh setup failed: {0}")]
    Refresh(#[from] crate::auth::RefreshError),

    #[error("Provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Summarizer setup failed: {0}")]
    Summarizer(#[from] crate::summarize::SummarizeError),

    #[error("Push token verifier setup failed: {0}")]
    Verifier(#[from] crate::ingest::VerifyError),

    #[error("Failed to bind '{addr}': {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid timezone '{name}'")]
    InvalidTimezone { name: String },

    #[error("Invalid time '{value}' for {field}: expected HH:MM")]
    InvalidTime { field: &'static str, value: String },
}

/// Failures of the background sync pipeline.
///
/// Write races are absorbed by conflict-free SQL and never surface here.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The access credential needs a refresh that could not be completed now.
    #[error("Credential for account {account_id} expired: {reason}")]
    AuthExpired { account_id: String, reason: String },

    /// The refresh grant is gone; the account has been disconnected.
    #[error("Credential for account {account_id} revoked: {reason}")]
    AuthRevoked { account_id: String, reason: String },

    #[error("History cursor {cursor} is stale")]
    CursorStale { cursor: u64 },

    #[error("Notification {notification_id} is owned by another delivery")]
    DuplicateNotification { notification_id: String },

    #[error("{service} unavailable: {reason}")]
    DownstreamUnavailable {
        service: &'static str,
        reason: String,
    },

    #[error("No mailbox account for '{0}'")]
    AccountNotFound(String),

    #[error("Mailbox account {0} is disconnected")]
    AccountDisconnected(String),

    #[error("Circuit breaker open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("Processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("Storage failure: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Processing task aborted: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether this failure counts toward the circuit breaker's error rate.
    ///
    /// Only failures of shared downstreams count. A single revoked or
    /// disconnected account must not open the breaker for everyone.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            SyncError::AuthExpired { .. }
                | SyncError::DownstreamUnavailable { .. }
                | SyncError::Timeout(_)
                | SyncError::Database(_)
                | SyncError::Internal(_)
        )
    }

    /// Short machine-readable kind, used in logs and the ledger.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::AuthExpired { .. } => "auth_expired",
            SyncError::AuthRevoked { .. } => "auth_revoked",
            SyncError::CursorStale { .. } => "cursor_stale",
            SyncError::DuplicateNotification { .. } => "duplicate_notification",
            SyncError::DownstreamUnavailable { .. } => "downstream_unavailable",
            SyncError::AccountNotFound(_) => "account_not_found",
            SyncError::AccountDisconnected(_) => "account_disconnected",
            SyncError::CircuitOpen { .. } => "circuit_open",
            SyncError::Timeout(_) => "timeout",
            SyncError::Database(_) => "database",
            SyncError::Internal(_) => "internal",
        }
    }

    /// Maps a provider failure for `account_id` into the pipeline taxonomy.
    pub fn from_provider(account_id: &str, err: ProviderError) -> Self {
        match err {
            ProviderError::CursorExpired { cursor } => SyncError::CursorStale { cursor },
            ProviderError::Unauthorized(reason) => SyncError::AuthExpired {
                account_id: account_id.to_string(),
                reason,
            },
            other => SyncError::DownstreamUnavailable {
                service: "mail provider",
                reason: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, MailpulseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_classification() {
        let counted = [
            SyncError::DownstreamUnavailable {
                service: "summarizer",
                reason: "503".to_string(),
            },
            SyncError::Timeout(Duration::from_secs(30)),
            SyncError::Internal("panic".to_string()),
        ];
        for err in &counted {
            assert!(err.trips_breaker(), "{} should count", err.kind());
        }

        let ignored = [
            SyncError::AuthRevoked {
                account_id: "acc".to_string(),
                reason: "invalid_grant".to_string(),
            },
            SyncError::AccountDisconnected("acc".to_string()),
            SyncError::AccountNotFound("x@example.com".to_string()),
            SyncError::CircuitOpen {
                retry_in: Duration::from_secs(5),
            },
            SyncError::DuplicateNotification {
                notification_id: "n1".to_string(),
            },
        ];
        for err in &ignored {
            assert!(!err.trips_breaker(), "{} should not count", err.kind());
        }
    }

    #[test]
    fn test_provider_errors_map_into_taxonomy() {
        assert!(matches!(
            SyncError::from_provider("acc", ProviderError::CursorExpired { cursor: 42 }),
            SyncError::CursorStale { cursor: 42 }
        ));
        assert!(matches!(
            SyncError::from_provider("acc", ProviderError::Unauthorized("401".to_string())),
            SyncError::AuthExpired { .. }
        ));
        let mapped = SyncError::from_provider("acc", ProviderError::RateLimited);
        assert_eq!(mapped.kind(), "downstream_unavailable");
        assert!(mapped.trips_breaker());
    }
}
