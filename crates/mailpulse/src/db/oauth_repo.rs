//! OAuth token repository: `oauth_tokens` table.
//!
//! Token columns hold whatever the caller hands in; the credential store
//! encrypts them before they reach this layer.

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// A raw OAuth token row from the database.
#[derive(Debug, Clone)]
pub struct OAuthTokenRow {
    pub account_id: String,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Inserts or updates the token for an account.
pub fn upsert(db: &Database, row: &OAuthTokenRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO oauth_tokens (account_id, provider, access_token, refresh_token, expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(account_id) DO UPDATE SET
               provider = ?2,
               access_token = ?3,
               refresh_token = ?4,
               expires_at = ?5,
               updated_at = ?7",
            params![
                row.account_id,
                row.provider,
                row.access_token,
                row.refresh_token,
                row.expires_at,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds the token for an account.
pub fn find(db: &Database, account_id: &str) -> Result<Option<OAuthTokenRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT account_id, provider, access_token, refresh_token, expires_at, created_at, updated_at
                 FROM oauth_tokens WHERE account_id = ?1",
                params![account_id],
                |row| {
                    Ok(OAuthTokenRow {
                        account_id: row.get(0)?,
                        provider: row.get(1)?,
                        access_token: row.get(2)?,
                        refresh_token: row.get(3)?,
                        expires_at: row.get(4)?,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
}

/// Deletes the token for an account.
pub fn delete(db: &Database, account_id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "DELETE FROM oauth_tokens WHERE account_id = ?1",
            params![account_id],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::account_repo::{self, AccountRow};

    fn test_db() -> Database {
        let db = Database::open_in_memory().expect("Failed to create test database");
        account_repo::insert(
            &db,
            &AccountRow {
                id: "acc-1".to_string(),
                user_id: "u1".to_string(),
                email_address: "a@example.com".to_string(),
                timezone: "UTC".to_string(),
                connected: true,
                history_id: None,
                last_synced_at: None,
                disconnected_reason: None,
                created_at: "2026-01-01T00:00:00.000Z".to_string(),
                updated_at: "2026-01-01T00:00:00.000Z".to_string(),
            },
        )
        .unwrap();
        db
    }

    fn sample_token(account: &str) -> OAuthTokenRow {
        OAuthTokenRow {
            account_id: account.to_string(),
            provider: "gmail".to_string(),
            access_token: "access-123".to_string(),
            refresh_token: Some("refresh-456".to_string()),
            expires_at: "2026-12-31T23:59:59.000Z".to_string(),
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            updated_at: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_upsert_and_find() {
        let db = test_db();
        upsert(&db, &sample_token("acc-1")).unwrap();

        let found = find(&db, "acc-1").unwrap().unwrap();
        assert_eq!(found.provider, "gmail");
        assert_eq!(found.access_token, "access-123");
        assert_eq!(found.refresh_token.as_deref(), Some("refresh-456"));
    }

    #[test]
    fn test_upsert_overwrites() {
        let db = test_db();
        upsert(&db, &sample_token("acc-1")).unwrap();

        let mut updated = sample_token("acc-1");
        updated.access_token = "new-access".to_string();
        updated.updated_at = "2026-06-01T00:00:00.000Z".to_string();
        upsert(&db, &updated).unwrap();

        let found = find(&db, "acc-1").unwrap().unwrap();
        assert_eq!(found.access_token, "new-access");
        assert_eq!(found.created_at, "2026-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_token_requires_account() {
        let db = test_db();
        assert!(upsert(&db, &sample_token("unknown-account")).is_err());
    }

    #[test]
    fn test_delete_and_cascade() {
        let db = test_db();
        upsert(&db, &sample_token("acc-1")).unwrap();
        delete(&db, "acc-1").unwrap();
        assert!(find(&db, "acc-1").unwrap().is_none());

        upsert(&db, &sample_token("acc-1")).unwrap();
        account_repo::delete(&db, "acc-1").unwrap();
        assert!(find(&db, "acc-1").unwrap().is_none());
    }
}
