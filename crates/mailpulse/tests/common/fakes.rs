//! In-memory collaborators for driving the sync pipeline in tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use mailpulse::auth::{RefreshError, RefreshedToken, TokenRefresher};
use mailpulse::ingest::{PushTokenClaims, PushTokenVerifier, VerifyError};
use mailpulse::provider::{
    AddedMessage, HistoryPage, HistoryRecord, MailMessage, MailProvider, MailThread,
    MailboxSession, ProviderError,
};
use mailpulse::summarize::{MessageInsight, SummarizeError, Summarizer};
use mailpulse::HistoryCursor;

/// A mailbox whose history and threads are set up by the test.
#[derive(Default)]
pub struct FakeProvider {
    records: Mutex<Vec<HistoryRecord>>,
    threads: Mutex<HashMap<String, MailThread>>,
    current: Mutex<HistoryCursor>,
    /// Starts below this are rejected as expired.
    oldest_valid: Mutex<HistoryCursor>,
    outage: AtomicBool,
    /// One-shot `Unavailable` answers, consumed before `outage` is checked.
    blips: AtomicUsize,
    /// One-shot `Unauthorized` answers to history listing.
    rejections: AtomicUsize,
    tokens_seen: Mutex<Vec<String>>,
    pub history_calls: AtomicUsize,
    pub thread_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `message` to its thread and records it in history at `cursor`.
    pub fn deliver(&self, cursor: u64, message: MailMessage) {
        self.records.lock().unwrap().push(HistoryRecord {
            id: HistoryCursor(cursor),
            added: vec![AddedMessage {
                message_id: message.id.clone(),
                thread_id: message.thread_id.clone(),
                labels: message.labels.clone(),
            }],
        });
        self.threads
            .lock()
            .unwrap()
            .entry(message.thread_id.clone())
            .or_insert_with(|| MailThread {
                id: message.thread_id.clone(),
                messages: Vec::new(),
            })
            .messages
            .push(message);

        let mut current = self.current.lock().unwrap();
        *current = (*current).max(HistoryCursor(cursor));
    }

    pub fn set_current(&self, cursor: u64) {
        *self.current.lock().unwrap() = HistoryCursor(cursor);
    }

    pub fn expire_before(&self, cursor: u64) {
        *self.oldest_valid.lock().unwrap() = HistoryCursor(cursor);
    }

    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// The next `n` calls fail with `Unavailable`, then service resumes.
    pub fn fail_next(&self, n: usize) {
        self.blips.store(n, Ordering::SeqCst);
    }

    /// The next `n` history listings refuse the access token.
    pub fn reject_token_next(&self, n: usize) {
        self.rejections.store(n, Ordering::SeqCst);
    }

    /// Access tokens presented to history listing, in order.
    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().unwrap().clone()
    }

    fn check_outage(&self) -> Result<(), ProviderError> {
        if take_one(&self.blips) {
            return Err(ProviderError::Unavailable("502 Bad Gateway".to_string()));
        }
        if self.outage.load(Ordering::SeqCst) {
            Err(ProviderError::Unavailable("503 Service Unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MailProvider for FakeProvider {
    async fn list_history(
        &self,
        session: &MailboxSession,
        start: HistoryCursor,
        _page_token: Option<&str>,
    ) -> Result<HistoryPage, ProviderError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen
            .lock()
            .unwrap()
            .push(session.access_token.expose_secret().to_string());
        self.check_outage()?;
        if take_one(&self.rejections) {
            return Err(ProviderError::Unauthorized("401 invalid credentials".to_string()));
        }
        if start < *self.oldest_valid.lock().unwrap() {
            return Err(ProviderError::CursorExpired { cursor: start.0 });
        }
        let records = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.id > start)
            .cloned()
            .collect();
        Ok(HistoryPage {
            records,
            next_page_token: None,
            cursor: *self.current.lock().unwrap(),
        })
    }

    async fn current_cursor(&self, _session: &MailboxSession) -> Result<HistoryCursor, ProviderError> {
        self.check_outage()?;
        Ok(*self.current.lock().unwrap())
    }

    async fn get_thread(
        &self,
        _session: &MailboxSession,
        thread_id: &str,
    ) -> Result<MailThread, ProviderError> {
        self.thread_calls.fetch_add(1, Ordering::SeqCst);
        self.check_outage()?;
        self.threads
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(thread_id.to_string()))
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Answers with a fixed insight per subject.
#[derive(Default)]
pub struct FakeSummarizer {
    by_subject: Mutex<HashMap<String, MessageInsight>>,
    unavailable: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, subject: &str, category: &str, priority: u8) {
        self.by_subject.lock().unwrap().insert(
            subject.to_string(),
            MessageInsight {
                category: category.to_string(),
                headline: format!("{} summary", subject),
                priority: Some(priority),
                insights: vec![format!("about {}", category.to_lowercase())],
            },
        );
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, message: &MailMessage) -> Result<MessageInsight, SummarizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SummarizeError::Unavailable("503".to_string()));
        }
        Ok(self
            .by_subject
            .lock()
            .unwrap()
            .get(&message.subject)
            .cloned()
            .unwrap_or_else(|| MessageInsight::fallback(message)))
    }
}

/// Hands out fresh tokens, or refuses with a configured error.
#[derive(Default)]
pub struct FakeRefresher {
    revoked: AtomicBool,
    blips: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    /// The next `n` refreshes fail as if the token endpoint were down.
    pub fn fail_next(&self, n: usize) {
        self.blips.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenRefresher for FakeRefresher {
    async fn refresh(&self, _refresh_token: &SecretString) -> Result<RefreshedToken, RefreshError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if take_one(&self.blips) {
            return Err(RefreshError::Unavailable("503".to_string()));
        }
        if self.revoked.load(Ordering::SeqCst) {
            return Err(RefreshError::Revoked("invalid_grant".to_string()));
        }
        Ok(RefreshedToken {
            access_token: SecretString::from(format!("access-{}", n)),
            refresh_token: None,
            expires_in: Duration::from_secs(3600),
        })
    }
}

/// Accepts exactly one token value.
pub struct FakeVerifier {
    pub token: String,
    pub claims: PushTokenClaims,
}

impl FakeVerifier {
    pub fn valid_until(token: &str, expires: DateTime<Utc>) -> Self {
        Self {
            token: token.to_string(),
            claims: PushTokenClaims {
                iss: "https://accounts.google.com".to_string(),
                aud: String::new(),
                email: Some("push@example.iam.gserviceaccount.com".to_string()),
                email_verified: true,
                exp: expires.timestamp(),
            },
        }
    }
}

#[async_trait]
impl PushTokenVerifier for FakeVerifier {
    async fn claims(&self, token: &str) -> Result<PushTokenClaims, VerifyError> {
        if token == self.token {
            Ok(self.claims.clone())
        } else {
            Err(VerifyError::Invalid("signature mismatch".to_string()))
        }
    }
}
