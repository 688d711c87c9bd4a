//! A fully wired `SyncService` over an in-memory database and fakes.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use secrecy::SecretString;
use tokio::sync::broadcast;

use mailpulse::auth::{Credential, CredentialStore, SqliteCredentialStore};
use mailpulse::config::Config;
use mailpulse::db::account_repo::{self, AccountRow};
use mailpulse::db::{self as store, notification_repo, Database};
use mailpulse::ingest::PushNotification;
use mailpulse::provider::MailMessage;
use mailpulse::sync::CursorStore;
use mailpulse::{
    Clock, HistoryCursor, ManualClock, ServiceParts, SyncEvent, SyncEventBroadcaster, SyncEventKind,
    SyncService, TokenEncryptor,
};

use super::fakes::{FakeProvider, FakeRefresher, FakeSummarizer};

const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// 2026-03-02 06:00 UTC, inside the first half of the UTC day.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap()
}

/// Defaults with retries and backoff shrunk for tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.summarizer.max_attempts = 2;
    config.summarizer.base_backoff_ms = 1;
    config.summarizer.max_backoff_ms = 2;
    for retry in [&mut config.provider.retry, &mut config.credentials.retry] {
        retry.max_attempts = 3;
        retry.base_backoff_ms = 1;
        retry.max_backoff_ms = 2;
    }
    config
}

pub fn message(id: &str, thread_id: &str, subject: &str, received_at: DateTime<Utc>) -> MailMessage {
    MailMessage {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        subject: subject.to_string(),
        from: "sender@example.com".to_string(),
        snippet: format!("{} ...", subject),
        received_at,
        labels: vec!["INBOX".to_string()],
    }
}

pub fn notification(id: &str, email: &str, history_id: u64) -> PushNotification {
    PushNotification {
        id: id.to_string(),
        email_address: email.to_string(),
        history_id: HistoryCursor(history_id),
        publish_time: None,
        subscription: None,
    }
}

pub struct TestHarness {
    pub db: Database,
    pub clock: Arc<ManualClock>,
    pub provider: Arc<FakeProvider>,
    pub summarizer: Arc<FakeSummarizer>,
    pub refresher: Arc<FakeRefresher>,
    pub credentials: Arc<SqliteCredentialStore>,
    pub events: SyncEventBroadcaster,
    pub service: Arc<SyncService>,
    pub config: Config,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let db = Database::open_in_memory().expect("in-memory database");
        let clock = Arc::new(ManualClock::new(start_time()));
        let provider = Arc::new(FakeProvider::new());
        let summarizer = Arc::new(FakeSummarizer::new());
        let refresher = Arc::new(FakeRefresher::new());
        let encryptor = Arc::new(TokenEncryptor::from_hex_key(TEST_KEY).expect("test key"));
        let credentials = Arc::new(SqliteCredentialStore::new(db.clone(), encryptor));
        let events = SyncEventBroadcaster::new(64);

        let service = SyncService::build(
            &config,
            db.clone(),
            ServiceParts {
                provider: provider.clone(),
                summarizer: summarizer.clone(),
                refresher: refresher.clone(),
                credentials: credentials.clone(),
                clock: clock.clone(),
            },
            events.clone(),
        )
        .expect("service graph");

        Self {
            db,
            clock,
            provider,
            summarizer,
            refresher,
            credentials,
            events,
            service,
            config,
        }
    }

    /// Links an account with a credential valid for another hour.
    pub fn link_account(
        &self,
        account_id: &str,
        user_id: &str,
        email: &str,
        timezone: &str,
        cursor: Option<u64>,
    ) {
        let now = store::timestamp(self.clock.now());
        account_repo::insert(
            &self.db,
            &AccountRow {
                id: account_id.to_string(),
                user_id: user_id.to_string(),
                email_address: email.to_string(),
                timezone: timezone.to_string(),
                connected: true,
                history_id: cursor.map(|c| c as i64),
                last_synced_at: None,
                disconnected_reason: None,
                created_at: now.clone(),
                updated_at: now,
            },
        )
        .expect("insert account");

        self.credentials
            .update(
                account_id,
                &Credential {
                    access_token: SecretString::from("access-0".to_string()),
                    refresh_token: Some(SecretString::from("refresh-0".to_string())),
                    expires_at: self.clock.now() + chrono::Duration::hours(1),
                },
            )
            .expect("store credential");
    }

    pub fn cursor(&self, account_id: &str) -> Option<HistoryCursor> {
        CursorStore::new(self.db.clone())
            .load(account_id)
            .expect("load cursor")
    }

    pub fn ledger_status(&self, notification_id: &str) -> Option<String> {
        notification_repo::find(&self.db, notification_id)
            .expect("find ledger row")
            .map(|row| row.status)
    }

    pub fn account(&self, account_id: &str) -> AccountRow {
        account_repo::find_by_id(&self.db, account_id)
            .expect("find account")
            .expect("account exists")
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }
}

/// Waits for the completed/failed event of one notification.
pub async fn wait_for_outcome(
    rx: &mut broadcast::Receiver<SyncEvent>,
    notification_id: &str,
) -> SyncEventKind {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.expect("event channel open");
            match &event.kind {
                SyncEventKind::NotificationCompleted {
                    notification_id: id,
                    ..
                }
                | SyncEventKind::NotificationFailed {
                    notification_id: id,
                    ..
                } if id == notification_id => return event.kind,
                _ => {}
            }
        }
    })
    .await
    .expect("notification outcome within timeout")
}
