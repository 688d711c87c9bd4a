//! Credential persistence.

use std::sync::Arc;

use chrono::Utc;
use log::info;
use secrecy::{ExposeSecret, SecretString};

use super::{Credential, CredentialError};
use crate::db::{self, account_repo, oauth_repo, Database};
use crate::secrets::TokenEncryptor;

const PROVIDER_NAME: &str = "oauth2";

pub trait CredentialStore: Send + Sync {
    fn get(&self, account_id: &str) -> Result<Option<Credential>, CredentialError>;

    fn update(&self, account_id: &str, credential: &Credential) -> Result<(), CredentialError>;

    /// Flags the account not-connected and forgets its credential.
    fn mark_disconnected(&self, account_id: &str, reason: &str) -> Result<(), CredentialError>;
}

/// Stores credentials in `oauth_tokens`, sealed per account.
pub struct SqliteCredentialStore {
    db: Database,
    encryptor: Arc<TokenEncryptor>,
}

impl SqliteCredentialStore {
    pub fn new(db: Database, encryptor: Arc<TokenEncryptor>) -> Self {
        Self { db, encryptor }
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self, account_id: &str) -> Result<Option<Credential>, CredentialError> {
        let Some(row) = oauth_repo::find(&self.db, account_id)? else {
            return Ok(None);
        };

        let access_token =
            SecretString::from(self.encryptor.decrypt(account_id, &row.access_token)?);
        let refresh_token = row
            .refresh_token
            .as_deref()
            .map(|t| self.encryptor.decrypt(account_id, t).map(SecretString::from))
            .transpose()?;
        let expires_at = db::parse_timestamp("oauth_tokens", &row.expires_at)?;

        Ok(Some(Credential {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    fn update(&self, account_id: &str, credential: &Credential) -> Result<(), CredentialError> {
        let now = db::timestamp(Utc::now());
        let refresh_token = credential
            .refresh_token
            .as_ref()
            .map(|t| self.encryptor.encrypt(account_id, t.expose_secret()))
            .transpose()?;

        oauth_repo::upsert(
            &self.db,
            &oauth_repo::OAuthTokenRow {
                account_id: account_id.to_string(),
                provider: PROVIDER_NAME.to_string(),
                access_token: self
                    .encryptor
                    .encrypt(account_id, credential.access_token.expose_secret())?,
                refresh_token,
                expires_at: db::timestamp(credential.expires_at),
                created_at: now.clone(),
                updated_at: now,
            },
        )?;
        Ok(())
    }

    fn mark_disconnected(&self, account_id: &str, reason: &str) -> Result<(), CredentialError> {
        let now = db::timestamp(Utc::now());
        account_repo::set_connected(&self.db, account_id, false, Some(reason), &now)?;
        oauth_repo::delete(&self.db, account_id)?;
        info!("Account {} disconnected: {}", account_id, reason);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::account_repo::AccountRow;
    use chrono::{Duration, TimeZone};

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn store() -> (SqliteCredentialStore, Database) {
        let db = Database::open_in_memory().unwrap();
        account_repo::insert(
            &db,
            &AccountRow {
                id: "acc-1".to_string(),
                user_id: "user-1".to_string(),
                email_address: "a@example.com".to_string(),
                timezone: "UTC".to_string(),
                connected: true,
                history_id: Some(1),
                last_synced_at: None,
                disconnected_reason: None,
                created_at: "2026-01-01T00:00:00.000Z".to_string(),
                updated_at: "2026-01-01T00:00:00.000Z".to_string(),
            },
        )
        .unwrap();
        let encryptor = Arc::new(TokenEncryptor::from_hex_key(TEST_KEY).unwrap());
        (SqliteCredentialStore::new(db.clone(), encryptor), db)
    }

    #[test]
    fn test_update_and_get_roundtrip_encrypted() {
        let (store, db) = store();
        let expires_at = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        store
            .update(
                "acc-1",
                &Credential {
                    access_token: SecretString::from("access-1".to_string()),
                    refresh_token: Some(SecretString::from("refresh-1".to_string())),
                    expires_at,
                },
            )
            .unwrap();

        let raw = oauth_repo::find(&db, "acc-1").unwrap().unwrap();
        assert_ne!(raw.access_token, "access-1");

        let credential = store.get("acc-1").unwrap().unwrap();
        assert_eq!(credential.access_token.expose_secret(), "access-1");
        assert_eq!(
            credential.refresh_token.unwrap().expose_secret(),
            "refresh-1"
        );
        assert_eq!(credential.expires_at, expires_at);
    }

    #[test]
    fn test_mark_disconnected() {
        let (store, db) = store();
        store
            .update(
                "acc-1",
                &Credential {
                    access_token: SecretString::from("a".to_string()),
                    refresh_token: None,
                    expires_at: Utc::now() + Duration::hours(1),
                },
            )
            .unwrap();

        store.mark_disconnected("acc-1", "invalid_grant").unwrap();

        let account = account_repo::find_by_id(&db, "acc-1").unwrap().unwrap();
        assert!(!account.connected);
        assert_eq!(account.disconnected_reason.as_deref(), Some("invalid_grant"));
        assert!(store.get("acc-1").unwrap().is_none());
    }
}
