//! Sync lifecycle events for in-process subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEventKind {
    NotificationCompleted {
        notification_id: String,
        new_messages: usize,
    },
    NotificationFailed {
        notification_id: String,
        error: String,
    },
    AccountDisconnected {
        account_id: String,
        reason: String,
    },
    FullResyncRequired {
        account_id: String,
        baseline_cursor: u64,
    },
    DigestUpdated {
        user_id: String,
        digest_date: String,
        period: String,
        total_count: usize,
    },
    DigestRegenerationRequested {
        user_id: String,
        digest_date: String,
        period: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    #[serde(flatten)]
    pub kind: SyncEventKind,
    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    pub fn new(kind: SyncEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Fans sync events out to any number of subscribers.
#[derive(Clone)]
pub struct SyncEventBroadcaster {
    sender: Arc<broadcast::Sender<SyncEvent>>,
}

impl SyncEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, kind: SyncEventKind) {
        // No subscribers is fine.
        let _ = self.sender.send(SyncEvent::new(kind));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

impl Default for SyncEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
