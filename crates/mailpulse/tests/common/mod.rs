//! Shared test utilities for mailpulse integration tests.
//!
//! - `TestHarness` wires a real `SyncService` over an in-memory database
//! - `fakes` holds scripted provider, summarizer, refresher and verifier

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::*;
