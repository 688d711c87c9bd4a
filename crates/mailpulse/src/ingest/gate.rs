//! Idempotency gate over the inbound notification ledger.

use std::sync::Arc;

use chrono::Duration;
use rusqlite::Connection;

use super::payload::PushNotification;
use crate::clock::Clock;
use crate::config::LedgerConfig;
use crate::db::notification_repo::{
    self, NotificationRow, STATUS_COMPLETED, STATUS_FAILED, STATUS_PROCESSING,
};
use crate::db::{self, Database, DatabaseError};

/// Outcome of presenting a notification to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The caller owns processing for this notification.
    Admitted,
    AlreadyProcessing,
    AlreadyCompleted,
    /// Failed and out of attempts.
    AlreadyFailed,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        self == Admission::Admitted
    }
}

#[derive(Clone)]
pub struct NotificationGate {
    db: Database,
    clock: Arc<dyn Clock>,
    lease: Duration,
    max_attempts: u32,
}

impl NotificationGate {
    pub fn new(db: Database, clock: Arc<dyn Clock>, lease: Duration, max_attempts: u32) -> Self {
        Self {
            db,
            clock,
            lease,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(db: Database, clock: Arc<dyn Clock>, config: &LedgerConfig) -> Self {
        let lease = Duration::seconds(i64::try_from(config.lease_secs).unwrap_or(i64::MAX / 1000));
        Self::new(db, clock, lease, config.max_attempts)
    }

    /// Claims a notification for processing.
    ///
    /// Exactly one concurrent caller sees [`Admission::Admitted`] per id. A
    /// `failed` row with attempts left is claimed again; every other caller
    /// is told the row's current status.
    pub fn admit(&self, notification: &PushNotification) -> Result<Admission, DatabaseError> {
        let now = self.clock.now();
        let now_str = db::timestamp(now);
        let lease_str = db::timestamp(now + self.lease);

        let row = NotificationRow {
            id: notification.id.clone(),
            account_email: notification.email_address.clone(),
            history_id: i64::try_from(notification.history_id.0).unwrap_or(i64::MAX),
            payload: serde_json::to_string(notification)?,
            status: STATUS_PROCESSING.to_string(),
            attempts: 1,
            error: None,
            received_at: now_str.clone(),
            updated_at: now_str.clone(),
            lease_expires_at: Some(lease_str.clone()),
        };

        if notification_repo::insert_if_absent(&self.db, &row)? {
            return Ok(Admission::Admitted);
        }

        if notification_repo::reclaim_failed(
            &self.db,
            &notification.id,
            self.max_attempts,
            &now_str,
            &lease_str,
        )? {
            log::info!("Reclaimed failed notification {}", notification.id);
            return Ok(Admission::Admitted);
        }

        let status = notification_repo::find(&self.db, &notification.id)?
            .map(|r| r.status)
            .unwrap_or_else(|| STATUS_PROCESSING.to_string());

        Ok(match status.as_str() {
            STATUS_COMPLETED => Admission::AlreadyCompleted,
            STATUS_FAILED => Admission::AlreadyFailed,
            _ => Admission::AlreadyProcessing,
        })
    }

    /// Extends the lease of a notification still being processed.
    pub fn heartbeat(&self, notification_id: &str) -> Result<bool, DatabaseError> {
        let now = self.clock.now();
        notification_repo::extend_lease(
            &self.db,
            notification_id,
            &db::timestamp(now),
            &db::timestamp(now + self.lease),
        )
    }

    /// Marks completed on a caller-held transaction.
    ///
    /// `false` means the row was no longer `processing` (its lease expired).
    pub fn complete_in(&self, conn: &Connection, notification_id: &str) -> Result<bool, DatabaseError> {
        notification_repo::mark_completed(conn, notification_id, &db::timestamp(self.clock.now()))
    }

    pub fn complete(&self, notification_id: &str) -> Result<bool, DatabaseError> {
        self.db
            .with_conn(|conn| self.complete_in(conn, notification_id))
    }

    pub fn fail(&self, notification_id: &str, error: &str) -> Result<bool, DatabaseError> {
        let now = db::timestamp(self.clock.now());
        self.db
            .with_conn(|conn| notification_repo::mark_failed(conn, notification_id, error, &now))
    }

    /// Fails every `processing` row whose lease has run out.
    pub fn expire_leases(&self) -> Result<Vec<String>, DatabaseError> {
        notification_repo::expire_leases(&self.db, &db::timestamp(self.clock.now()))
    }

    pub fn find(&self, notification_id: &str) -> Result<Option<NotificationRow>, DatabaseError> {
        notification_repo::find(&self.db, notification_id)
    }
}
