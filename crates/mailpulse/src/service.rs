//! The sync service graph, built once at startup and shared by handle.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::auth::{
    CredentialKeeper, CredentialStore, OAuthRefreshClient, SqliteCredentialStore, TokenRefresher,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::notification_repo::{self, STATUS_PROCESSING};
use crate::db::stats_repo::{self, SyncCounter, SyncStatRow};
use crate::db::{account_repo, Database, DatabaseError};
use crate::digest::DigestAggregator;
use crate::error::{ConfigError, SyncError};
use crate::events::{SyncEventBroadcaster, SyncEventKind};
use crate::ingest::{Admission, NotificationGate, PushNotification};
use crate::provider::{HttpMailProvider, MailProvider};
use crate::retry::RetryPolicy;
use crate::secrets::TokenEncryptor;
use crate::summarize::{KeywordSummarizer, LlmSummarizer, RetryingSummarizer, Summarizer};
use crate::sync::{
    BreakerSettings, BreakerSnapshot, CircuitBreaker, FetchEngine, LeaseReaper, MailboxProcessor,
    ProcessReport,
};

/// What the ingress did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// Admitted; processing runs in the background.
    Queued,
    /// Seen before. Carries the ledger state it was found in.
    Duplicate(Admission),
    /// No linked account for the address.
    Ignored,
}

/// External collaborators, swappable for fakes.
pub struct ServiceParts {
    pub provider: Arc<dyn MailProvider>,
    pub summarizer: Arc<dyn Summarizer>,
    pub refresher: Arc<dyn TokenRefresher>,
    pub credentials: Arc<dyn CredentialStore>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub breaker: BreakerSnapshot,
    pub processing: u64,
    pub today: SyncStatRow,
}

pub struct SyncService {
    db: Database,
    gate: NotificationGate,
    processor: MailboxProcessor,
    breaker: CircuitBreaker,
    aggregator: Arc<DigestAggregator>,
    events: SyncEventBroadcaster,
    clock: Arc<dyn Clock>,
    heartbeat_every: Duration,
    sweep_every: Duration,
}

impl SyncService {
    /// Wires the graph around the given collaborators.
    pub fn build(
        config: &Config,
        db: Database,
        parts: ServiceParts,
        events: SyncEventBroadcaster,
    ) -> Result<Arc<Self>, ConfigError> {
        let clock = parts.clock;
        let gate = NotificationGate::from_config(db.clone(), clock.clone(), &config.ledger);
        let keeper = Arc::new(CredentialKeeper::new(
            parts.credentials,
            parts.refresher,
            clock.clone(),
            events.clone(),
            Duration::from_secs(config.credentials.refresh_buffer_secs),
            RetryPolicy::from_config(&config.credentials.retry),
        ));
        let fetch = FetchEngine::new(
            parts.provider,
            &config.provider.mailbox_scope,
            config.provider.thread_concurrency,
            RetryPolicy::from_config(&config.provider.retry),
        );
        let summarizer = Arc::new(RetryingSummarizer::from_config(
            parts.summarizer,
            &config.summarizer,
        ));
        let aggregator = Arc::new(DigestAggregator::from_config(
            db.clone(),
            &config.digest,
            clock.clone(),
            events.clone(),
        )?);
        let processor = MailboxProcessor::new(
            db.clone(),
            gate.clone(),
            keeper,
            fetch,
            summarizer,
            aggregator.clone(),
            events.clone(),
            clock.clone(),
        );
        let breaker = CircuitBreaker::new(BreakerSettings::from(&config.breaker), clock.clone());

        let lease = Duration::from_secs(config.ledger.lease_secs.max(3));
        Ok(Arc::new(Self {
            db,
            gate,
            processor,
            breaker,
            aggregator,
            events,
            clock,
            heartbeat_every: lease / 3,
            sweep_every: Duration::from_secs(config.ledger.sweep_interval_secs),
        }))
    }

    /// Builds the production graph: HTTP provider, OAuth refresh, encrypted
    /// credential store, and the LLM summarizer when an endpoint is set.
    pub fn from_config(
        config: &Config,
        db: Database,
        events: SyncEventBroadcaster,
    ) -> crate::error::Result<Arc<Self>> {
        let encryptor = Arc::new(TokenEncryptor::from_env()?);
        let summarizer: Arc<dyn Summarizer> = match &config.summarizer.endpoint {
            Some(endpoint) => Arc::new(LlmSummarizer::new(
                endpoint,
                &config.summarizer.model,
                config.summarizer.api_key.resolve_optional()?,
                Duration::from_secs(config.summarizer.request_timeout_secs),
            )?),
            None => {
                info!("No summarizer endpoint configured, using keyword categorization");
                Arc::new(KeywordSummarizer)
            }
        };

        let parts = ServiceParts {
            provider: Arc::new(HttpMailProvider::new(&config.provider)?),
            summarizer,
            refresher: Arc::new(OAuthRefreshClient::from_config(&config.credentials)?),
            credentials: Arc::new(SqliteCredentialStore::new(db.clone(), encryptor)),
            clock: Arc::new(SystemClock),
        };
        Ok(Self::build(config, db, parts, events)?)
    }

    pub fn events(&self) -> &SyncEventBroadcaster {
        &self.events
    }

    pub fn gate(&self) -> &NotificationGate {
        &self.gate
    }

    pub fn aggregator(&self) -> &DigestAggregator {
        &self.aggregator
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    /// A reaper for this service's ledger, on the configured interval.
    pub fn lease_reaper(&self) -> LeaseReaper {
        LeaseReaper::new(self.gate.clone(), self.events.clone(), self.sweep_every)
    }

    /// Admits a notification and, if admitted, starts background processing.
    ///
    /// Returns as soon as the ledger row exists; completion is reported
    /// through events and the ledger.
    pub fn handle_notification(
        self: &Arc<Self>,
        notification: PushNotification,
    ) -> Result<Ingested, DatabaseError> {
        self.count(SyncCounter::Received);

        if account_repo::find_by_email(&self.db, &notification.email_address)?.is_none() {
            info!(
                notification_id = %notification.id,
                account = %notification.email_address,
                "notification for unknown account ignored"
            );
            return Ok(Ingested::Ignored);
        }

        match self.gate.admit(&notification)? {
            Admission::Admitted => {
                debug!(notification_id = %notification.id, "notification admitted");
                self.spawn_processing(notification);
                Ok(Ingested::Queued)
            }
            other => {
                debug!(notification_id = %notification.id, admission = ?other, "duplicate delivery");
                self.count(SyncCounter::Duplicate);
                Ok(Ingested::Duplicate(other))
            }
        }
    }

    /// Runs an admitted notification through the breaker and records the
    /// terminal status. The ledger row must already be `processing`.
    pub async fn process_admitted(
        &self,
        notification: &PushNotification,
    ) -> Result<ProcessReport, SyncError> {
        let result = self
            .breaker
            .call(|| self.process_with_heartbeat(notification))
            .await;
        self.record(notification, &result);
        result
    }

    async fn process_with_heartbeat(
        &self,
        notification: &PushNotification,
    ) -> Result<ProcessReport, SyncError> {
        let work = self.processor.process_event(notification);
        tokio::pin!(work);

        let mut ticker = tokio::time::interval(self.heartbeat_every);
        ticker.tick().await;
        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = ticker.tick() => {
                    if let Err(e) = self.gate.heartbeat(&notification.id) {
                        warn!(notification_id = %notification.id, error = %e, "lease heartbeat failed");
                    }
                }
            }
        }
    }

    fn spawn_processing(self: &Arc<Self>, notification: PushNotification) {
        let worker = Arc::clone(self);
        let owned = notification.clone();
        let task = tokio::spawn(async move {
            // Outcome is recorded inside.
            let _ = worker.process_admitted(&owned).await;
        });

        // A panic skips the recording above; the watcher fills it in.
        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = task.await {
                let reason = if e.is_panic() {
                    "processing task panicked"
                } else {
                    "processing task cancelled"
                };
                watcher.record(&notification, &Err(SyncError::Internal(reason.to_string())));
            }
        });
    }

    fn record(&self, notification: &PushNotification, result: &Result<ProcessReport, SyncError>) {
        match result {
            Ok(report) => {
                self.count(SyncCounter::Completed);
                self.events.send(SyncEventKind::NotificationCompleted {
                    notification_id: notification.id.clone(),
                    new_messages: report.new_messages,
                });
            }
            Err(SyncError::DuplicateNotification { .. }) => {
                warn!(
                    notification_id = %notification.id,
                    "processing lease lost before completion, changes rolled back"
                );
            }
            Err(e) => {
                error!(
                    notification_id = %notification.id,
                    account = %notification.email_address,
                    history_id = %notification.history_id,
                    kind = e.kind(),
                    error = %e,
                    "notification processing failed"
                );
                let detail = format!("{}: {}", e.kind(), e);
                match self.gate.fail(&notification.id, &detail) {
                    Ok(true) => {}
                    Ok(false) => debug!(notification_id = %notification.id, "ledger row already terminal"),
                    Err(db_err) => error!(
                        notification_id = %notification.id,
                        error = %db_err,
                        "failed to record notification failure"
                    ),
                }
                self.count(SyncCounter::Failed);
                self.events.send(SyncEventKind::NotificationFailed {
                    notification_id: notification.id.clone(),
                    error: detail,
                });
            }
        }
    }

    pub fn health(&self) -> Result<HealthReport, DatabaseError> {
        let breaker = self.breaker.snapshot();
        let day = stats_repo::day_key(self.clock.now());
        let today = stats_repo::find(&self.db, &day)?.unwrap_or_else(|| SyncStatRow {
            date: day,
            ..SyncStatRow::default()
        });
        Ok(HealthReport {
            status: if breaker.state == crate::sync::BreakerState::Closed {
                "ok"
            } else {
                "degraded"
            },
            processing: notification_repo::count_by_status(&self.db, STATUS_PROCESSING)?,
            breaker,
            today,
        })
    }

    fn count(&self, counter: SyncCounter) {
        let day = stats_repo::day_key(self.clock.now());
        if let Err(e) = stats_repo::increment(&self.db, &day, counter, 1) {
            debug!(error = %e, "failed to update sync stats");
        }
    }
}
