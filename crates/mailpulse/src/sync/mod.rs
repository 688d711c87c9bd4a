//! Incremental mailbox sync: cursor, fetch, dedup, breaker and processing.

pub mod breaker;
pub mod cursor;
pub mod dedup;
pub mod fetch;
pub mod processor;
pub mod reaper;

pub use breaker::{BreakerSettings, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use cursor::{CursorStore, HistoryCursor};
pub use dedup::DedupLedger;
pub use fetch::{FetchEngine, FetchOutcome, ThreadChange};
pub use processor::{MailboxProcessor, ProcessOutcome, ProcessReport};
pub use reaper::LeaseReaper;
