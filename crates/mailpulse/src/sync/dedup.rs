//! Ledger of (thread, message) pairs already folded into digests.

use chrono::{DateTime, Utc};
use log::debug;

use crate::db::{self, message_repo, Database, DatabaseError};
use crate::provider::MailMessage;
use crate::sync::fetch::ThreadChange;

/// Tracks which messages have produced domain effects, per user.
#[derive(Clone)]
pub struct DedupLedger {
    db: Database,
}

impl DedupLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// A thread counts as handled only when its current latest message is
    /// recorded. New replies on a seen thread are not suppressed.
    pub fn is_processed(
        &self,
        user_id: &str,
        thread_id: &str,
        latest_message_id: &str,
    ) -> Result<bool, DatabaseError> {
        message_repo::exists_in_thread(&self.db, user_id, thread_id, latest_message_id)
    }

    /// Records a message. A repeat call is a no-op and returns `false`.
    pub fn mark_processed(
        &self,
        user_id: &str,
        thread_id: &str,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let created = message_repo::insert(
            &self.db,
            &message_repo::ProcessedMessageRow {
                message_id: message_id.to_string(),
                user_id: user_id.to_string(),
                thread_id: thread_id.to_string(),
                included_in_digest: false,
                processed_at: db::timestamp(now),
            },
        )?;
        if !created {
            debug!("Message {} already recorded for user {}", message_id, user_id);
        }
        Ok(created)
    }

    /// Drops handled threads and, within the rest, already-recorded messages.
    ///
    /// Returns each remaining thread with the messages that still need work.
    pub fn filter_unprocessed(
        &self,
        user_id: &str,
        changes: Vec<ThreadChange>,
    ) -> Result<Vec<(ThreadChange, Vec<MailMessage>)>, DatabaseError> {
        let mut pending = Vec::with_capacity(changes.len());
        for change in changes {
            let Some(latest) = change.latest_message() else {
                continue;
            };
            if self.is_processed(user_id, change.thread_id(), &latest.id)? {
                debug!(
                    "Thread {} already handled at message {}",
                    change.thread_id(),
                    latest.id
                );
                continue;
            }

            let candidate_ids: Vec<String> =
                change.added_messages().map(|m| m.id.clone()).collect();
            let seen = message_repo::find_processed_ids(&self.db, user_id, &candidate_ids)?;
            let fresh: Vec<MailMessage> = change
                .added_messages()
                .filter(|m| !seen.contains(&m.id))
                .cloned()
                .collect();
            if !fresh.is_empty() {
                pending.push((change, fresh));
            }
        }
        Ok(pending)
    }

    pub fn mark_included_in_digest(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> Result<u64, DatabaseError> {
        message_repo::mark_included(&self.db, user_id, message_ids)
    }
}
