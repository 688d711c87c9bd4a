//! Keeps each account's access credential fresh.
//!
//! `Valid` until the credential is within the refresh buffer of expiry, then
//! `Expiring` until a refresh succeeds. A revoked grant or a missing refresh
//! token disconnects the account, which stays `Disconnected` until it is
//! linked again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, warn};

use super::{Credential, CredentialStore, RefreshError, TokenRefresher};
use crate::clock::Clock;
use crate::error::SyncError;
use crate::events::{SyncEventBroadcaster, SyncEventKind};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Valid,
    Expiring,
    Disconnected,
}

pub struct CredentialKeeper {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    clock: Arc<dyn Clock>,
    events: SyncEventBroadcaster,
    refresh_buffer: chrono::Duration,
    retry: RetryPolicy,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CredentialKeeper {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        clock: Arc<dyn Clock>,
        events: SyncEventBroadcaster,
        refresh_buffer: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            refresher,
            clock,
            events,
            refresh_buffer: chrono::Duration::from_std(refresh_buffer)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            retry,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    fn is_expiring(&self, credential: &Credential) -> bool {
        credential.expires_at - self.refresh_buffer <= self.clock.now()
    }

    pub fn state(&self, account_id: &str) -> Result<CredentialState, SyncError> {
        Ok(match self.store.get(account_id)? {
            None => CredentialState::Disconnected,
            Some(c) if self.is_expiring(&c) => CredentialState::Expiring,
            Some(_) => CredentialState::Valid,
        })
    }

    /// Returns a usable access token, refreshing first when needed.
    ///
    /// Concurrent callers for the same account share a single refresh.
    pub async fn ensure_valid(&self, account_id: &str) -> Result<SecretString, SyncError> {
        match self.store.get(account_id)? {
            Some(c) if !self.is_expiring(&c) => return Ok(c.access_token),
            Some(_) => {}
            None => return Err(self.disconnect(account_id, "no stored credential")),
        }

        let lock = self.refresh_lock(account_id);
        let _guard = lock.lock().await;

        // Another task may have refreshed while we waited.
        match self.store.get(account_id)? {
            Some(c) if !self.is_expiring(&c) => Ok(c.access_token),
            Some(_) => self.refresh(account_id).await.map(|c| c.access_token),
            None => Err(SyncError::AccountDisconnected(account_id.to_string())),
        }
    }

    /// Replaces an access token the provider refused before its stored
    /// expiry. Callers racing on the same rejected token share one refresh.
    pub async fn refresh_rejected(
        &self,
        account_id: &str,
        rejected: &SecretString,
    ) -> Result<SecretString, SyncError> {
        let lock = self.refresh_lock(account_id);
        let _guard = lock.lock().await;

        if let Some(c) = self.store.get(account_id)? {
            if c.access_token.expose_secret() != rejected.expose_secret() && !self.is_expiring(&c) {
                return Ok(c.access_token);
            }
        }
        info!(account = %account_id, "access token rejected by provider, refreshing");
        self.refresh(account_id).await.map(|c| c.access_token)
    }

    /// Exchanges the refresh token for a new credential and stores it.
    ///
    /// An unreachable token endpoint is retried under the keeper's policy.
    pub async fn refresh(&self, account_id: &str) -> Result<Credential, SyncError> {
        let current = match self.store.get(account_id)? {
            Some(c) => c,
            None => return Err(self.disconnect(account_id, "no stored credential")),
        };
        let Some(refresh_token) = current.refresh_token.clone() else {
            return Err(self.disconnect(account_id, "no refresh capability"));
        };

        let result = self
            .retry
            .run(
                "token endpoint",
                |e: &RefreshError| matches!(e, RefreshError::Unavailable(_)),
                || self.refresher.refresh(&refresh_token),
            )
            .await;
        match result {
            Ok(token) => {
                let expires_in = chrono::Duration::from_std(token.expires_in)
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
                let credential = Credential {
                    access_token: token.access_token,
                    refresh_token: token.refresh_token.or(Some(refresh_token)),
                    expires_at: self.clock.now() + expires_in,
                };
                self.store.update(account_id, &credential)?;
                info!(account = %account_id, "credential refreshed");
                Ok(credential)
            }
            Err(RefreshError::Revoked(reason)) => Err(self.disconnect(account_id, &reason)),
            Err(RefreshError::Unavailable(reason)) => Err(SyncError::DownstreamUnavailable {
                service: "token endpoint",
                reason,
            }),
            Err(RefreshError::Rejected(reason)) => Err(SyncError::AuthExpired {
                account_id: account_id.to_string(),
                reason,
            }),
        }
    }

    /// Flags the account disconnected and returns the error to surface.
    fn disconnect(&self, account_id: &str, reason: &str) -> SyncError {
        warn!(account = %account_id, reason = %reason, "disconnecting account");
        if let Err(e) = self.store.mark_disconnected(account_id, reason) {
            warn!(account = %account_id, error = %e, "failed to record disconnection");
            return e.into();
        }
        self.events.send(SyncEventKind::AccountDisconnected {
            account_id: account_id.to_string(),
            reason: reason.to_string(),
        });
        SyncError::AuthRevoked {
            account_id: account_id.to_string(),
            reason: reason.to_string(),
        }
    }

    fn refresh_lock(&self, account_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            locks
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}
