//! Per-account history cursor persistence.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Deserializer, Serialize};

use crate::db::{self, account_repo, Database, DatabaseError};

/// Opaque, monotonic "last seen change" token for a mailbox.
///
/// Providers send it as a decimal string or a bare number; both parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HistoryCursor(pub u64);

impl fmt::Display for HistoryCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HistoryCursor {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(HistoryCursor)
    }
}

impl<'de> Deserialize<'de> for HistoryCursor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(HistoryCursor(n)),
            Raw::Text(s) => s
                .parse()
                .map_err(|e| D::Error::custom(format!("invalid history cursor '{}': {}", s, e))),
        }
    }
}

impl HistoryCursor {
    /// SQLite integers are signed; cursors beyond `i64::MAX` saturate.
    fn to_sql(self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }

    fn from_sql(value: i64) -> Result<Self, DatabaseError> {
        u64::try_from(value)
            .map(HistoryCursor)
            .map_err(|_| DatabaseError::CorruptRow {
                table: "mailbox_accounts",
                reason: format!("negative history_id {}", value),
            })
    }
}

/// Reads and writes the cursor column of `mailbox_accounts`.
#[derive(Clone)]
pub struct CursorStore {
    db: Database,
}

impl CursorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The stored cursor, or `None` for an account never synced.
    pub fn load(&self, account_id: &str) -> Result<Option<HistoryCursor>, DatabaseError> {
        match account_repo::find_by_id(&self.db, account_id)? {
            Some(row) => row.history_id.map(HistoryCursor::from_sql).transpose(),
            None => Ok(None),
        }
    }

    /// Moves the cursor forward on a caller-held connection or transaction.
    /// Never moves it backwards; returns whether the stored value changed.
    pub fn advance(
        conn: &Connection,
        account_id: &str,
        cursor: HistoryCursor,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        account_repo::advance_history_id(conn, account_id, cursor.to_sql(), &db::timestamp(now))
    }

    /// Replaces the cursor with a provider baseline after a stale cursor.
    pub fn reset_baseline(
        conn: &Connection,
        account_id: &str,
        cursor: HistoryCursor,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        account_repo::reset_history_id(conn, account_id, cursor.to_sql(), &db::timestamp(now))
    }

    /// Records a sync that left the cursor where it was.
    pub fn touch(
        conn: &Connection,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        account_repo::touch_synced(conn, account_id, &db::timestamp(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::account_repo::AccountRow;

    fn store_with_account(history_id: Option<i64>) -> (CursorStore, Database) {
        let db = Database::open_in_memory().unwrap();
        account_repo::insert(
            &db,
            &AccountRow {
                id: "acc-1".to_string(),
                user_id: "user-1".to_string(),
                email_address: "a@example.com".to_string(),
                timezone: "UTC".to_string(),
                connected: true,
                history_id,
                last_synced_at: None,
                disconnected_reason: None,
                created_at: "2026-01-01T00:00:00.000Z".to_string(),
                updated_at: "2026-01-01T00:00:00.000Z".to_string(),
            },
        )
        .unwrap();
        (CursorStore::new(db.clone()), db)
    }

    fn advance(db: &Database, account_id: &str, cursor: u64) -> bool {
        db.with_conn(|conn| CursorStore::advance(conn, account_id, HistoryCursor(cursor), Utc::now()))
            .unwrap()
    }

    #[test]
    fn test_parse_cursor_forms() {
        assert_eq!("  1234 ".parse::<HistoryCursor>().unwrap(), HistoryCursor(1234));
        assert!("abc".parse::<HistoryCursor>().is_err());

        let from_text: HistoryCursor = serde_json::from_str(r#""77""#).unwrap();
        let from_number: HistoryCursor = serde_json::from_str("77").unwrap();
        assert_eq!(from_text, from_number);
        assert!(serde_json::from_str::<HistoryCursor>(r#""-1""#).is_err());
    }

    #[test]
    fn test_advance_is_monotonic() {
        let (store, db) = store_with_account(Some(90));

        assert!(advance(&db, "acc-1", 100));
        assert!(!advance(&db, "acc-1", 95));
        assert!(!advance(&db, "acc-1", 100));
        assert_eq!(store.load("acc-1").unwrap(), Some(HistoryCursor(100)));
    }

    #[test]
    fn test_first_advance_from_empty() {
        let (store, db) = store_with_account(None);
        assert_eq!(store.load("acc-1").unwrap(), None);
        assert!(advance(&db, "acc-1", 5));
        assert_eq!(store.load("acc-1").unwrap(), Some(HistoryCursor(5)));
    }

    #[test]
    fn test_reset_baseline_may_move_backwards() {
        let (store, db) = store_with_account(Some(900));
        db.with_conn(|conn| CursorStore::reset_baseline(conn, "acc-1", HistoryCursor(400), Utc::now()))
            .unwrap();
        assert_eq!(store.load("acc-1").unwrap(), Some(HistoryCursor(400)));
    }

    #[test]
    fn test_unknown_account_has_no_cursor() {
        let (store, db) = store_with_account(Some(1));
        assert_eq!(store.load("missing").unwrap(), None);
        assert!(!advance(&db, "missing", 2));
    }
}
