pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod digest;
pub mod error;
pub mod events;
pub mod ingest;
pub mod logging;
pub mod provider;
pub mod retry;
pub mod secrets;
pub mod service;
pub mod summarize;
pub mod sync;

pub use auth::{CredentialKeeper, CredentialState, CredentialStore, TokenRefresher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, Config};
pub use db::Database;
pub use digest::{Digest, DigestAggregator, DigestPeriod, PeriodWindows};
pub use error::{ConfigError, MailpulseError, Result, SyncError};
pub use events::{SyncEvent, SyncEventBroadcaster, SyncEventKind};
pub use ingest::{Admission, NotificationGate, PushNotification, WebhookAuthenticator};
pub use provider::{MailProvider, ProviderError};
pub use retry::RetryPolicy;
pub use secrets::{resolve_secret, SecretError, TokenEncryptor};
pub use service::{Ingested, ServiceParts, SyncService};
pub use summarize::{MessageInsight, Summarizer};
pub use sync::{CircuitBreaker, HistoryCursor, MailboxProcessor};
