//! Access credentials for linked mailbox accounts.

pub mod keeper;
pub mod refresh;
pub mod store;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::SyncError;
use crate::secrets::SecretError;

pub use keeper::{CredentialKeeper, CredentialState};
pub use refresh::{OAuthRefreshClient, RefreshedToken, TokenRefresher};
pub use store::{CredentialStore, SqliteCredentialStore};

/// An OAuth-style credential for one mailbox account.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credential storage failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Credential encryption failed: {0}")]
    Encryption(#[from] SecretError),
}

impl From<CredentialError> for SyncError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Database(e) => SyncError::Database(e),
            CredentialError::Encryption(e) => SyncError::Internal(e.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum RefreshError {
    /// The grant was revoked or expired (`invalid_grant`).
    #[error("Refresh grant revoked: {0}")]
    Revoked(String),

    #[error("Token endpoint unavailable: {0}")]
    Unavailable(String),

    /// Any other refusal, e.g. a misconfigured client.
    #[error("Token refresh rejected: {0}")]
    Rejected(String),
}
