//! One notification, start to finish.
//!
//! Resolve the account and its credential, skip duplicate cursors, fetch the
//! history window, drop already-handled messages, summarize the rest into
//! digests, then advance the cursor and complete the ledger row together.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::auth::CredentialKeeper;
use crate::clock::Clock;
use crate::db::stats_repo::{self, SyncCounter};
use crate::db::{account_repo, Database};
use crate::digest::{CategoryBuckets, DigestAggregator, DigestPeriod, SummaryEntry};
use crate::error::SyncError;
use crate::events::{SyncEventBroadcaster, SyncEventKind};
use crate::ingest::{NotificationGate, PushNotification};
use crate::provider::{MailMessage, MailboxSession};
use crate::summarize::{MessageInsight, RetryingSummarizer};
use crate::sync::cursor::{CursorStore, HistoryCursor};
use crate::sync::dedup::DedupLedger;
use crate::sync::fetch::FetchEngine;

/// How a notification was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The notification carried the cursor already stored.
    Unchanged,
    /// First notification for the account; its cursor became the baseline.
    Baselined,
    /// The stored cursor was stale and was replaced by the provider baseline.
    FullResync,
    Synced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    pub outcome: ProcessOutcome,
    pub account_id: String,
    pub new_messages: usize,
    pub digests_updated: usize,
    pub cursor: HistoryCursor,
}

pub struct MailboxProcessor {
    db: Database,
    cursors: CursorStore,
    dedup: DedupLedger,
    gate: NotificationGate,
    keeper: Arc<CredentialKeeper>,
    fetch: FetchEngine,
    summarizer: Arc<RetryingSummarizer>,
    aggregator: Arc<DigestAggregator>,
    events: SyncEventBroadcaster,
    clock: Arc<dyn Clock>,
}

impl MailboxProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        gate: NotificationGate,
        keeper: Arc<CredentialKeeper>,
        fetch: FetchEngine,
        summarizer: Arc<RetryingSummarizer>,
        aggregator: Arc<DigestAggregator>,
        events: SyncEventBroadcaster,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cursors: CursorStore::new(db.clone()),
            dedup: DedupLedger::new(db.clone()),
            db,
            gate,
            keeper,
            fetch,
            summarizer,
            aggregator,
            events,
            clock,
        }
    }

    /// Processes an admitted notification.
    ///
    /// On `Ok` the ledger row is `completed` and the cursor has advanced in
    /// the same transaction. On `Err` the row is left for the caller to fail.
    pub async fn process_event(
        &self,
        notification: &PushNotification,
    ) -> Result<ProcessReport, SyncError> {
        let span = info_span!(
            "process_notification",
            notification_id = %notification.id,
            account = %notification.email_address,
        );
        self.process_inner(notification).instrument(span).await
    }

    async fn process_inner(
        &self,
        notification: &PushNotification,
    ) -> Result<ProcessReport, SyncError> {
        let account = account_repo::find_by_email(&self.db, &notification.email_address)?
            .ok_or_else(|| SyncError::AccountNotFound(notification.email_address.clone()))?;
        if !account.connected {
            return Err(SyncError::AccountDisconnected(account.id));
        }

        let access_token = self.keeper.ensure_valid(&account.id).await?;
        let session = MailboxSession {
            email_address: account.email_address.clone(),
            access_token,
        };

        let stored = self.cursors.load(&account.id)?;
        let incoming = notification.history_id;

        let Some(stored) = stored else {
            info!(cursor = %incoming, "no stored cursor, baselining from notification");
            self.finish(&notification.id, &account.id, incoming, false)?;
            self.events.send(SyncEventKind::FullResyncRequired {
                account_id: account.id.clone(),
                baseline_cursor: incoming.0,
            });
            self.count(SyncCounter::FullResync, 1);
            return Ok(report(ProcessOutcome::Baselined, &account.id, incoming));
        };

        if stored == incoming {
            debug!(cursor = %stored, "cursor unchanged, nothing to fetch");
            self.finish(&notification.id, &account.id, stored, false)?;
            return Ok(report(ProcessOutcome::Unchanged, &account.id, stored));
        }

        // A token revoked or rotated upstream before its stored expiry gets
        // one refresh and one more fetch.
        let fetched = match self.fetch.fetch_since(&session, &account.id, stored).await {
            Err(SyncError::AuthExpired { reason, .. }) => {
                warn!(reason = %reason, "provider refused access token");
                let access_token = self
                    .keeper
                    .refresh_rejected(&account.id, &session.access_token)
                    .await?;
                let session = MailboxSession {
                    access_token,
                    ..session
                };
                self.fetch
                    .fetch_since(&session, &account.id, stored)
                    .await?
            }
            other => other?,
        };

        if fetched.needs_full_resync {
            self.finish(&notification.id, &account.id, fetched.new_cursor, true)?;
            self.events.send(SyncEventKind::FullResyncRequired {
                account_id: account.id.clone(),
                baseline_cursor: fetched.new_cursor.0,
            });
            self.count(SyncCounter::FullResync, 1);
            return Ok(report(
                ProcessOutcome::FullResync,
                &account.id,
                fetched.new_cursor,
            ));
        }

        let pending = self
            .dedup
            .filter_unprocessed(&account.user_id, fetched.changes)?;

        let mut by_period: BTreeMap<(NaiveDate, DigestPeriod), CategoryBuckets> = BTreeMap::new();
        let mut handled: Vec<MailMessage> = Vec::new();
        for (_, messages) in pending {
            for message in messages {
                let insight = self.summarizer.summarize_or_default(&message).await;
                let key = self
                    .aggregator
                    .locate(&account.timezone, message.received_at);
                by_period
                    .entry(key)
                    .or_default()
                    .entry(insight.category.clone())
                    .or_default()
                    .push(summary_entry(&message, insight));
                handled.push(message);
            }
        }

        let digests_updated = by_period.len();
        for ((date, period), buckets) in by_period {
            self.aggregator
                .merge(&account.user_id, date, period, buckets)?;
        }

        let now = self.clock.now();
        for message in &handled {
            self.dedup
                .mark_processed(&account.user_id, &message.thread_id, &message.id, now)?;
        }
        let ids: Vec<String> = handled.iter().map(|m| m.id.clone()).collect();
        self.dedup.mark_included_in_digest(&account.user_id, &ids)?;

        let target = incoming.max(fetched.new_cursor).max(stored);
        self.finish(&notification.id, &account.id, target, false)?;
        self.count(SyncCounter::Summarized, handled.len() as i64);

        info!(
            new_messages = handled.len(),
            digests = digests_updated,
            cursor = %target,
            "mailbox synced"
        );
        Ok(ProcessReport {
            outcome: ProcessOutcome::Synced,
            account_id: account.id,
            new_messages: handled.len(),
            digests_updated,
            cursor: target,
        })
    }

    /// Moves the cursor and completes the ledger row in one transaction.
    ///
    /// `reset` replaces the cursor outright (stale baseline); otherwise it
    /// only moves forward. Losing the ledger row to the lease reaper rolls
    /// everything back.
    fn finish(
        &self,
        notification_id: &str,
        account_id: &str,
        cursor: HistoryCursor,
        reset: bool,
    ) -> Result<(), SyncError> {
        let now = self.clock.now();
        self.db.with_transaction(|conn| {
            if reset {
                CursorStore::reset_baseline(conn, account_id, cursor, now)?;
            } else if !CursorStore::advance(conn, account_id, cursor, now)? {
                CursorStore::touch(conn, account_id, now)?;
            }
            if !self.gate.complete_in(conn, notification_id)? {
                return Err(SyncError::DuplicateNotification {
                    notification_id: notification_id.to_string(),
                });
            }
            Ok(())
        })
    }

    fn count(&self, counter: SyncCounter, amount: i64) {
        if amount == 0 {
            return;
        }
        let day = stats_repo::day_key(self.clock.now());
        if let Err(e) = stats_repo::increment(&self.db, &day, counter, amount) {
            debug!(error = %e, "failed to update sync stats");
        }
    }
}

fn report(outcome: ProcessOutcome, account_id: &str, cursor: HistoryCursor) -> ProcessReport {
    ProcessReport {
        outcome,
        account_id: account_id.to_string(),
        new_messages: 0,
        digests_updated: 0,
        cursor,
    }
}

fn summary_entry(message: &MailMessage, insight: MessageInsight) -> SummaryEntry {
    SummaryEntry {
        source_message_id: message.id.clone(),
        subject: message.subject.clone(),
        sender: message.from.clone(),
        headline: insight.headline,
        priority: insight.priority,
        insights: insight.insights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_summary_entry_takes_insight_fields() {
        let message = MailMessage {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            subject: "Standup moved".to_string(),
            from: "lead@example.com".to_string(),
            snippet: String::new(),
            received_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            labels: vec!["INBOX".to_string()],
        };
        let entry = summary_entry(
            &message,
            MessageInsight {
                category: "Calendar".to_string(),
                headline: "Standup is now at 10:00".to_string(),
                priority: Some(80),
                insights: vec!["reschedule".to_string()],
            },
        );
        assert_eq!(entry.source_message_id, "m1");
        assert_eq!(entry.sender, "lead@example.com");
        assert_eq!(entry.headline, "Standup is now at 10:00");
        assert_eq!(entry.priority, Some(80));
    }

    #[test]
    fn test_short_reports_carry_no_messages() {
        let r = report(ProcessOutcome::Unchanged, "acc-1", HistoryCursor(9));
        assert_eq!(r.new_messages, 0);
        assert_eq!(r.digests_updated, 0);
        assert_eq!(r.cursor, HistoryCursor(9));
    }
}
