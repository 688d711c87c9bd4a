//! The mail provider capability the sync engine depends on.
//!
//! The engine never talks to a concrete provider API directly. It sees paged
//! change history, the mailbox's current cursor and whole threads.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::cursor::HistoryCursor;

pub use http::HttpMailProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// The start cursor is too old or unknown to the provider.
    #[error("History cursor {cursor} expired")]
    CursorExpired { cursor: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Whether the same call may succeed if repeated shortly.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::RateLimited | ProviderError::Unavailable(_))
    }
}

/// Who is asking: the mailbox address plus a currently valid access token.
#[derive(Debug, Clone)]
pub struct MailboxSession {
    pub email_address: String,
    pub access_token: SecretString,
}

/// A message-added change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedMessage {
    pub message_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// One history record. Records without added messages (label changes,
/// deletions) carry an empty `added` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: HistoryCursor,
    #[serde(default)]
    pub added: Vec<AddedMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    #[serde(default)]
    pub records: Vec<HistoryRecord>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    /// The mailbox cursor as of this response.
    pub cursor: HistoryCursor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    pub id: String,
    pub thread_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub snippet: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailThread {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<MailMessage>,
}

impl MailThread {
    /// The message with the most recent timestamp. Ties go to the later entry.
    pub fn latest_message(&self) -> Option<&MailMessage> {
        self.messages.iter().max_by_key(|m| m.received_at)
    }
}

#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Lists change history after `start`, one page at a time.
    async fn list_history(
        &self,
        session: &MailboxSession,
        start: HistoryCursor,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ProviderError>;

    /// The mailbox's current cursor, used as a resync baseline.
    async fn current_cursor(&self, session: &MailboxSession) -> Result<HistoryCursor, ProviderError>;

    async fn get_thread(
        &self,
        session: &MailboxSession,
        thread_id: &str,
    ) -> Result<MailThread, ProviderError>;
}
