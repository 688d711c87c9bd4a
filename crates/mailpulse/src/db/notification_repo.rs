//! Inbound notification ledger: `inbound_notifications` table.
//!
//! Every status transition is a single conditional statement; callers learn
//! whether they won a race from the affected row count, never from a
//! preceding read.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

/// A raw ledger row from the database.
#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: String,
    pub account_email: String,
    pub history_id: i64,
    pub payload: String,
    pub status: String,
    pub attempts: u32,
    pub error: Option<String>,
    pub received_at: String,
    pub updated_at: String,
    pub lease_expires_at: Option<String>,
}

impl NotificationRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            account_email: row.get("account_email")?,
            history_id: row.get("history_id")?,
            payload: row.get("payload")?,
            status: row.get("status")?,
            attempts: row.get("attempts")?,
            error: row.get("error")?,
            received_at: row.get("received_at")?,
            updated_at: row.get("updated_at")?,
            lease_expires_at: row.get("lease_expires_at")?,
        })
    }
}

/// Inserts a `processing` row unless one already exists for this id.
///
/// Returns `true` when this call created the row.
pub fn insert_if_absent(db: &Database, row: &NotificationRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO inbound_notifications
             (id, account_email, history_id, payload, status, attempts, error,
              received_at, updated_at, lease_expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.id,
                row.account_email,
                row.history_id,
                row.payload,
                row.status,
                row.attempts,
                row.error,
                row.received_at,
                row.updated_at,
                row.lease_expires_at,
            ],
        )?;
        Ok(inserted == 1)
    })
}

/// Moves a `failed` row back to `processing` if it has attempts left.
///
/// Returns `true` when this call reclaimed the row.
pub fn reclaim_failed(
    db: &Database,
    id: &str,
    max_attempts: u32,
    now: &str,
    lease_expires_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE inbound_notifications
             SET status = 'processing', attempts = attempts + 1, error = NULL,
                 updated_at = ?3, lease_expires_at = ?4
             WHERE id = ?1 AND status = 'failed' AND attempts < ?2",
            params![id, max_attempts, now, lease_expires_at],
        )?;
        Ok(changed == 1)
    })
}

/// Finds a ledger row by notification id.
pub fn find(db: &Database, id: &str) -> Result<Option<NotificationRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM inbound_notifications WHERE id = ?1",
                params![id],
                NotificationRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Pushes the lease of a `processing` row forward.
pub fn extend_lease(
    db: &Database,
    id: &str,
    now: &str,
    lease_expires_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE inbound_notifications SET updated_at = ?2, lease_expires_at = ?3
             WHERE id = ?1 AND status = 'processing'",
            params![id, now, lease_expires_at],
        )?;
        Ok(changed == 1)
    })
}

/// Transitions a `processing` row to `completed`.
pub fn mark_completed(conn: &Connection, id: &str, now: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE inbound_notifications
         SET status = 'completed', error = NULL, updated_at = ?2, lease_expires_at = NULL
         WHERE id = ?1 AND status = 'processing'",
        params![id, now],
    )?;
    Ok(changed == 1)
}

/// Transitions a `processing` row to `failed` with an error detail.
pub fn mark_failed(
    conn: &Connection,
    id: &str,
    error: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE inbound_notifications
         SET status = 'failed', error = ?2, updated_at = ?3, lease_expires_at = NULL
         WHERE id = ?1 AND status = 'processing'",
        params![id, error, now],
    )?;
    Ok(changed == 1)
}

/// Fails every `processing` row whose lease ended before `now`.
///
/// Returns the ids that were reclaimed.
pub fn expire_leases(db: &Database, now: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "UPDATE inbound_notifications
             SET status = 'failed', error = 'lease expired', updated_at = ?1,
                 lease_expires_at = NULL
             WHERE status = 'processing' AND lease_expires_at IS NOT NULL
               AND lease_expires_at < ?1
             RETURNING id",
        )?;
        let ids = stmt
            .query_map(params![now], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

/// Counts ledger rows in the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM inbound_notifications WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample(id: &str) -> NotificationRow {
        NotificationRow {
            id: id.to_string(),
            account_email: "a@example.com".to_string(),
            history_id: 100,
            payload: r#"{"emailAddress":"a@example.com","historyId":100}"#.to_string(),
            status: STATUS_PROCESSING.to_string(),
            attempts: 1,
            error: None,
            received_at: "2026-01-01T00:00:00.000Z".to_string(),
            updated_at: "2026-01-01T00:00:00.000Z".to_string(),
            lease_expires_at: Some("2026-01-01T00:05:00.000Z".to_string()),
        }
    }

    #[test]
    fn test_insert_if_absent_only_once() {
        let db = test_db();
        assert!(insert_if_absent(&db, &sample("n1")).unwrap());
        assert!(!insert_if_absent(&db, &sample("n1")).unwrap());
        assert_eq!(count_by_status(&db, STATUS_PROCESSING).unwrap(), 1);
    }

    #[test]
    fn test_terminal_transitions_require_processing() {
        let db = test_db();
        insert_if_absent(&db, &sample("n1")).unwrap();

        db.with_conn(|conn| {
            assert!(mark_completed(conn, "n1", "2026-01-01T00:01:00.000Z")?);
            assert!(!mark_failed(conn, "n1", "late failure", "2026-01-01T00:02:00.000Z")?);
            assert!(!mark_completed(conn, "n1", "2026-01-01T00:02:00.000Z")?);
            Ok(())
        })
        .unwrap();

        let row = find(&db, "n1").unwrap().unwrap();
        assert_eq!(row.status, STATUS_COMPLETED);
        assert!(row.error.is_none());
        assert!(row.lease_expires_at.is_none());
    }

    #[test]
    fn test_reclaim_failed_respects_attempt_cap() {
        let db = test_db();
        insert_if_absent(&db, &sample("n1")).unwrap();
        db.with_conn(|conn| mark_failed(conn, "n1", "boom", "2026-01-01T00:01:00.000Z"))
            .unwrap();

        assert!(reclaim_failed(&db, "n1", 2, "2026-01-01T00:02:00.000Z", "2026-01-01T00:07:00.000Z").unwrap());
        let row = find(&db, "n1").unwrap().unwrap();
        assert_eq!(row.status, STATUS_PROCESSING);
        assert_eq!(row.attempts, 2);
        assert!(row.error.is_none());

        db.with_conn(|conn| mark_failed(conn, "n1", "boom again", "2026-01-01T00:03:00.000Z"))
            .unwrap();
        assert!(!reclaim_failed(&db, "n1", 2, "2026-01-01T00:04:00.000Z", "2026-01-01T00:09:00.000Z").unwrap());
        assert_eq!(find(&db, "n1").unwrap().unwrap().status, STATUS_FAILED);
    }

    #[test]
    fn test_reclaim_ignores_completed_rows() {
        let db = test_db();
        insert_if_absent(&db, &sample("n1")).unwrap();
        db.with_conn(|conn| mark_completed(conn, "n1", "2026-01-01T00:01:00.000Z"))
            .unwrap();
        assert!(!reclaim_failed(&db, "n1", 5, "2026-01-01T00:02:00.000Z", "2026-01-01T00:07:00.000Z").unwrap());
    }

    #[test]
    fn test_expire_leases() {
        let db = test_db();
        insert_if_absent(&db, &sample("stale")).unwrap();
        let mut fresh = sample("fresh");
        fresh.lease_expires_at = Some("2026-01-01T01:00:00.000Z".to_string());
        insert_if_absent(&db, &fresh).unwrap();

        let expired = expire_leases(&db, "2026-01-01T00:10:00.000Z").unwrap();
        assert_eq!(expired, vec!["stale".to_string()]);

        let stale = find(&db, "stale").unwrap().unwrap();
        assert_eq!(stale.status, STATUS_FAILED);
        assert_eq!(stale.error.as_deref(), Some("lease expired"));
        assert_eq!(find(&db, "fresh").unwrap().unwrap().status, STATUS_PROCESSING);
    }

    #[test]
    fn test_extend_lease_only_while_processing() {
        let db = test_db();
        insert_if_absent(&db, &sample("n1")).unwrap();
        assert!(extend_lease(&db, "n1", "2026-01-01T00:04:00.000Z", "2026-01-01T00:09:00.000Z").unwrap());
        assert_eq!(
            find(&db, "n1").unwrap().unwrap().lease_expires_at.as_deref(),
            Some("2026-01-01T00:09:00.000Z")
        );

        db.with_conn(|conn| mark_completed(conn, "n1", "2026-01-01T00:05:00.000Z"))
            .unwrap();
        assert!(!extend_lease(&db, "n1", "2026-01-01T00:06:00.000Z", "2026-01-01T00:11:00.000Z").unwrap());
    }
}
