//! Processed message repository: `processed_messages` table.

use rusqlite::params;

use super::{Database, DatabaseError};

/// A raw processed message row from the database.
#[derive(Debug, Clone)]
pub struct ProcessedMessageRow {
    pub message_id: String,
    pub user_id: String,
    pub thread_id: String,
    pub included_in_digest: bool,
    pub processed_at: String,
}

/// Inserts a processed message record.
///
/// Duplicate `(message_id, user_id)` pairs are ignored; returns `true`
/// when this call created the record.
pub fn insert(db: &Database, row: &ProcessedMessageRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO processed_messages
             (message_id, user_id, thread_id, included_in_digest, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.message_id,
                row.user_id,
                row.thread_id,
                row.included_in_digest,
                row.processed_at,
            ],
        )?;
        Ok(inserted == 1)
    })
}

/// Checks whether `message_id` is recorded for this user's thread.
pub fn exists_in_thread(
    db: &Database,
    user_id: &str,
    thread_id: &str,
    message_id: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM processed_messages
             WHERE user_id = ?1 AND thread_id = ?2 AND message_id = ?3",
            params![user_id, thread_id, message_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Returns all ids from `message_ids` already recorded for the user.
pub fn find_processed_ids(
    db: &Database,
    user_id: &str,
    message_ids: &[String],
) -> Result<Vec<String>, DatabaseError> {
    if message_ids.is_empty() {
        return Ok(Vec::new());
    }

    db.with_conn(|conn| {
        // Build IN clause with positional params.
        let placeholders: Vec<String> = (0..message_ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect();
        let sql = format!(
            "SELECT message_id FROM processed_messages
             WHERE user_id = ?1 AND message_id IN ({})",
            placeholders.join(", ")
        );

        let mut param_values: Vec<&dyn rusqlite::types::ToSql> = Vec::new();
        param_values.push(&user_id);
        for id in message_ids {
            param_values.push(id);
        }

        let mut stmt = conn.prepare(&sql)?;
        let result: Vec<String> = stmt
            .query_map(param_values.as_slice(), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(result)
    })
}

/// Flags records as folded into a digest. Returns the number of rows updated.
pub fn mark_included(
    db: &Database,
    user_id: &str,
    message_ids: &[String],
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "UPDATE processed_messages SET included_in_digest = 1
             WHERE user_id = ?1 AND message_id = ?2 AND included_in_digest = 0",
        )?;
        let mut total = 0u64;
        for id in message_ids {
            total += stmt.execute(params![user_id, id])? as u64;
        }
        Ok(total)
    })
}
