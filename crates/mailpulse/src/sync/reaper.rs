//! Periodic sweep of ledger rows whose processing lease ran out.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::db::DatabaseError;
use crate::events::{SyncEventBroadcaster, SyncEventKind};
use crate::ingest::NotificationGate;

pub const LEASE_EXPIRED: &str = "lease expired";

pub struct LeaseReaper {
    gate: NotificationGate,
    events: SyncEventBroadcaster,
    interval: Duration,
}

impl LeaseReaper {
    pub fn new(gate: NotificationGate, events: SyncEventBroadcaster, interval: Duration) -> Self {
        Self {
            gate,
            events,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    /// Fails every expired `processing` row once. Returns the reclaimed ids.
    pub fn sweep(&self) -> Result<Vec<String>, DatabaseError> {
        let expired = self.gate.expire_leases()?;
        for id in &expired {
            warn!(notification_id = %id, "processing lease expired, marked failed");
            self.events.send(SyncEventKind::NotificationFailed {
                notification_id: id.clone(),
                error: LEASE_EXPIRED.to_string(),
            });
        }
        Ok(expired)
    }

    /// Sweeps on a fixed interval until `shutdown` flips to `true`.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.sweep() {
                            Ok(ids) if !ids.is_empty() => debug!(count = ids.len(), "lease sweep reclaimed rows"),
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "lease sweep failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("lease reaper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
