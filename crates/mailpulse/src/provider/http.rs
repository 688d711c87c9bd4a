//! [`MailProvider`] over a JSON mailbox bridge.
//!
//! The bridge fronts the real provider and exposes three endpoints per
//! mailbox:
//!
//! - `GET {base}/mailboxes/{email}/history?start={cursor}[&pageToken=..]`
//!   (`410 Gone` when the cursor has expired)
//! - `GET {base}/mailboxes/{email}/cursor`
//! - `GET {base}/mailboxes/{email}/threads/{thread_id}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use super::{HistoryPage, MailProvider, MailThread, MailboxSession, ProviderError};
use crate::config::ProviderConfig;
use crate::sync::cursor::HistoryCursor;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct CursorResponse {
    cursor: HistoryCursor,
}

pub struct HttpMailProvider {
    client: Client,
    base_url: String,
}

impl HttpMailProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn mailbox_url(&self, session: &MailboxSession, tail: &str) -> String {
        format!(
            "{}/mailboxes/{}/{}",
            self.base_url, session.email_address, tail
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        session: &MailboxSession,
        url: &str,
        query: &[(&str, String)],
        what: &str,
        start: Option<HistoryCursor>,
    ) -> Result<T, ProviderError> {
        debug!(url = %url, "provider request");
        let response = self
            .client
            .get(url)
            .bearer_auth(session.access_token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, what, start));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Malformed(format!("{}: {}", what, e)))
    }
}

/// Maps a non-success status into the provider error classes.
fn classify_status(
    status: StatusCode,
    body: &str,
    what: &str,
    start: Option<HistoryCursor>,
) -> ProviderError {
    let detail: String = body.chars().take(200).collect();
    match status {
        StatusCode::GONE => match start {
            Some(cursor) => ProviderError::CursorExpired { cursor: cursor.0 },
            None => ProviderError::NotFound(format!("{} gone", what)),
        },
        StatusCode::NOT_FOUND => ProviderError::NotFound(format!("{}: {}", what, detail)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Unauthorized(format!("{} ({}): {}", what, status, detail))
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        s if s.is_server_error() => {
            ProviderError::Unavailable(format!("{} ({}): {}", what, status, detail))
        }
        _ => ProviderError::Malformed(format!("{} ({}): {}", what, status, detail)),
    }
}

#[async_trait]
impl MailProvider for HttpMailProvider {
    async fn list_history(
        &self,
        session: &MailboxSession,
        start: HistoryCursor,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ProviderError> {
        let url = self.mailbox_url(session, "history");
        let mut query = vec![("start", start.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        self.get_json(session, &url, &query, "history", Some(start))
            .await
    }

    async fn current_cursor(&self, session: &MailboxSession) -> Result<HistoryCursor, ProviderError> {
        let url = self.mailbox_url(session, "cursor");
        let response: CursorResponse = self.get_json(session, &url, &[], "cursor", None).await?;
        Ok(response.cursor)
    }

    async fn get_thread(
        &self,
        session: &MailboxSession,
        thread_id: &str,
    ) -> Result<MailThread, ProviderError> {
        let url = self.mailbox_url(session, &format!("threads/{}", thread_id));
        self.get_json(session, &url, &[], "thread", None).await
    }
}
