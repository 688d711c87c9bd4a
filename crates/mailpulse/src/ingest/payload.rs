//! Push notification envelope decoding.
//!
//! ```json
//! { "message": { "data": "<base64 JSON>", "messageId": "...", "publishTime": "..." },
//!   "subscription": "projects/p/subscriptions/s" }
//! ```
//!
//! `data` decodes to `{"emailAddress": "...", "historyId": ...}`.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::cursor::HistoryCursor;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Invalid envelope: {0}")]
    Envelope(String),

    #[error("Missing message id")]
    MissingMessageId,

    #[error("Message data is not valid base64")]
    Base64,

    #[error("Invalid message data: {0}")]
    Data(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub data: String,
    #[serde(default, alias = "message_id")]
    pub message_id: String,
    #[serde(default, alias = "publish_time")]
    pub publish_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailboxChange {
    email_address: String,
    history_id: HistoryCursor,
}

/// A decoded, validated mailbox change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    pub id: String,
    pub email_address: String,
    pub history_id: HistoryCursor,
    pub publish_time: Option<String>,
    pub subscription: Option<String>,
}

fn decode_data(data: &str) -> Result<Vec<u8>, PayloadError> {
    let trimmed = data.trim();
    STANDARD
        .decode(trimmed)
        .or_else(|_| URL_SAFE.decode(trimmed))
        .map_err(|_| PayloadError::Base64)
}

impl PushNotification {
    pub fn from_envelope(envelope: PushEnvelope) -> Result<Self, PayloadError> {
        let id = envelope.message.message_id.trim().to_string();
        if id.is_empty() {
            return Err(PayloadError::MissingMessageId);
        }

        let bytes = decode_data(&envelope.message.data)?;
        let change: MailboxChange =
            serde_json::from_slice(&bytes).map_err(|e| PayloadError::Data(e.to_string()))?;
        let email_address = change.email_address.trim().to_string();
        if email_address.is_empty() || !email_address.contains('@') {
            return Err(PayloadError::Data(format!(
                "invalid emailAddress '{}'",
                change.email_address
            )));
        }

        Ok(Self {
            id,
            email_address,
            history_id: change.history_id,
            publish_time: envelope.message.publish_time,
            subscription: envelope.subscription,
        })
    }

    /// Parses a raw request body.
    pub fn from_body(body: &[u8]) -> Result<Self, PayloadError> {
        let envelope: PushEnvelope =
            serde_json::from_slice(body).map_err(|e| PayloadError::Envelope(e.to_string()))?;
        Self::from_envelope(envelope)
    }
}
