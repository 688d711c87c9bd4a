//! Mailbox account repository: `mailbox_accounts` table.
//!
//! Cursor writes take a `&Connection` so they can be composed with ledger
//! transitions inside one transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw mailbox account row from the database.
#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: String,
    pub user_id: String,
    pub email_address: String,
    pub timezone: String,
    pub connected: bool,
    pub history_id: Option<i64>,
    pub last_synced_at: Option<String>,
    pub disconnected_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AccountRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            email_address: row.get("email_address")?,
            timezone: row.get("timezone")?,
            connected: row.get("connected")?,
            history_id: row.get("history_id")?,
            last_synced_at: row.get("last_synced_at")?,
            disconnected_reason: row.get("disconnected_reason")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a newly linked account.
pub fn insert(db: &Database, row: &AccountRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO mailbox_accounts (id, user_id, email_address, timezone, connected,
             history_id, last_synced_at, disconnected_reason, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.id,
                row.user_id,
                row.email_address,
                row.timezone,
                row.connected,
                row.history_id,
                row.last_synced_at,
                row.disconnected_reason,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds an account by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<AccountRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM mailbox_accounts WHERE id = ?1",
                params![id],
                AccountRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Finds an account by the mailbox address the provider reports in pushes.
///
/// Addresses are matched case-insensitively.
pub fn find_by_email(db: &Database, email: &str) -> Result<Option<AccountRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM mailbox_accounts WHERE email_address = ?1 COLLATE NOCASE",
                params![email],
                AccountRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Moves the stored cursor forward to `history_id`.
///
/// Returns `false` (and leaves the row untouched) when the stored cursor is
/// already at or beyond the requested value.
pub fn advance_history_id(
    conn: &Connection,
    id: &str,
    history_id: i64,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE mailbox_accounts
         SET history_id = ?2, last_synced_at = ?3, updated_at = ?3
         WHERE id = ?1 AND (history_id IS NULL OR history_id < ?2)",
        params![id, history_id, now],
    )?;
    Ok(changed == 1)
}

/// Replaces the stored cursor unconditionally (full resync baseline).
pub fn reset_history_id(
    conn: &Connection,
    id: &str,
    history_id: i64,
    now: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE mailbox_accounts
         SET history_id = ?2, last_synced_at = ?3, updated_at = ?3
         WHERE id = ?1",
        params![id, history_id, now],
    )?;
    Ok(())
}

/// Records a successful sync that did not move the cursor.
pub fn touch_synced(conn: &Connection, id: &str, now: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE mailbox_accounts SET last_synced_at = ?2, updated_at = ?2 WHERE id = ?1",
        params![id, now],
    )?;
    Ok(())
}

/// Flags the account connected or disconnected.
pub fn set_connected(
    db: &Database,
    id: &str,
    connected: bool,
    reason: Option<&str>,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE mailbox_accounts
             SET connected = ?2, disconnected_reason = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, connected, reason, now],
        )?;
        Ok(changed == 1)
    })
}

/// Deletes an account (unlinking). Its stored tokens cascade.
pub fn delete(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM mailbox_accounts WHERE id = ?1", params![id])?;
        Ok(())
    })
}
