//! Sync statistics repository: per-day ingestion counters.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::{Database, DatabaseError};

/// A counter tracked per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCounter {
    Received,
    Duplicate,
    Completed,
    Failed,
    Summarized,
    FullResync,
}

impl SyncCounter {
    fn column(self) -> &'static str {
        match self {
            SyncCounter::Received => "notifications_received",
            SyncCounter::Duplicate => "notifications_duplicate",
            SyncCounter::Completed => "notifications_completed",
            SyncCounter::Failed => "notifications_failed",
            SyncCounter::Summarized => "messages_summarized",
            SyncCounter::FullResync => "full_resyncs",
        }
    }
}

/// The UTC day a counter update belongs to.
pub fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Adds `amount` to one counter of the given day.
pub fn increment(
    db: &Database,
    date: &str,
    counter: SyncCounter,
    amount: i64,
) -> Result<(), DatabaseError> {
    // Column names come from a closed enum, never from input.
    let column = counter.column();
    let sql = format!(
        "INSERT INTO sync_stats (date, {column}) VALUES (?1, ?2)
         ON CONFLICT(date) DO UPDATE SET {column} = {column} + ?2"
    );
    db.with_conn(|conn| {
        conn.execute(&sql, params![date, amount])?;
        Ok(())
    })
}

/// A single statistics row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatRow {
    pub date: String,
    pub notifications_received: i64,
    pub notifications_duplicate: i64,
    pub notifications_completed: i64,
    pub notifications_failed: i64,
    pub messages_summarized: i64,
    pub full_resyncs: i64,
}

/// Finds the counters for one day.
pub fn find(db: &Database, date: &str) -> Result<Option<SyncStatRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT date, notifications_received, notifications_duplicate,
                 notifications_completed, notifications_failed, messages_summarized, full_resyncs
                 FROM sync_stats WHERE date = ?1",
                params![date],
                |row| {
                    Ok(SyncStatRow {
                        date: row.get(0)?,
                        notifications_received: row.get(1)?,
                        notifications_duplicate: row.get(2)?,
                        notifications_completed: row.get(3)?,
                        notifications_failed: row.get(4)?,
                        messages_summarized: row.get(5)?,
                        full_resyncs: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
}
