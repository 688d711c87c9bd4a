//! Circuit breaker guarding mailbox processing.
//!
//! Closed: calls pass and outcomes land in a rolling time window. Once the
//! window holds at least `minimum_calls` outcomes and the failure share
//! reaches the threshold, the breaker opens. Open: calls fail fast until the
//! reset timeout elapses. HalfOpen: exactly one trial call runs; success
//! closes the breaker, failure reopens it.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::BreakerConfig;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub error_threshold_percent: f64,
    pub call_timeout: Duration,
    pub reset_timeout: Duration,
    pub rolling_window: Duration,
    pub minimum_calls: u32,
}

impl From<&BreakerConfig> for BreakerSettings {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            error_threshold_percent: config.error_threshold_percent,
            call_timeout: Duration::from_secs(config.timeout_secs),
            reset_timeout: Duration::from_secs(config.reset_secs),
            rolling_window: Duration::from_secs(config.rolling_window_secs),
            minimum_calls: config.minimum_calls,
        }
    }
}

/// Point-in-time view for health reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub window_calls: usize,
    pub window_failures: usize,
    pub times_opened: u64,
}

struct Inner {
    state: BreakerState,
    /// `(finished_at, failed)` for calls inside the rolling window.
    outcomes: VecDeque<(DateTime<Utc>, bool)>,
    opened_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    times_opened: u64,
}

pub struct CircuitBreaker {
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

fn chrono_span(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(3650))
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                outcomes: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
                times_opened: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State stays consistent across a panic in another holder.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        self.prune(&mut inner, self.clock.now());
        BreakerSnapshot {
            state: inner.state,
            window_calls: inner.outcomes.len(),
            window_failures: inner.outcomes.iter().filter(|(_, failed)| *failed).count(),
            times_opened: inner.times_opened,
        }
    }

    /// Runs `operation` under the breaker with the hard per-call timeout.
    ///
    /// While open, returns [`SyncError::CircuitOpen`] without calling
    /// `operation`. A timeout is reported as [`SyncError::Timeout`] and
    /// counted as a failure.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let permit = self.acquire()?;

        let result = match tokio::time::timeout(self.settings.call_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.settings.call_timeout)),
        };

        let failed = matches!(&result, Err(e) if e.trips_breaker());
        permit.finish(failed);
        result
    }

    fn acquire(&self) -> Result<CallPermit<'_>, SyncError> {
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.state {
            BreakerState::Closed => Ok(CallPermit::new(self, false)),
            BreakerState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let reopen_at = opened_at + chrono_span(self.settings.reset_timeout);
                if now >= reopen_at {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!("circuit breaker half-open, allowing trial call");
                    Ok(CallPermit::new(self, true))
                } else {
                    let retry_in = (reopen_at - now).to_std().unwrap_or(Duration::ZERO);
                    Err(SyncError::CircuitOpen { retry_in })
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(SyncError::CircuitOpen {
                        retry_in: self.settings.call_timeout,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(CallPermit::new(self, true))
                }
            }
        }
    }

    fn record(&self, trial: bool, failed: bool) {
        let now = self.clock.now();
        let mut inner = self.lock();

        if trial {
            inner.trial_in_flight = false;
            if failed {
                self.open(&mut inner, now, "trial call failed");
            } else {
                inner.state = BreakerState::Closed;
                inner.opened_at = None;
                inner.outcomes.clear();
                info!("circuit breaker closed after successful trial");
            }
            return;
        }

        inner.outcomes.push_back((now, failed));
        self.prune(&mut inner, now);

        if inner.state != BreakerState::Closed {
            return;
        }
        let calls = inner.outcomes.len();
        if calls < self.settings.minimum_calls as usize {
            return;
        }
        let failures = inner.outcomes.iter().filter(|(_, f)| *f).count();
        let rate = failures as f64 * 100.0 / calls as f64;
        if rate >= self.settings.error_threshold_percent {
            let reason = format!("error rate {:.0}% over {} calls", rate, calls);
            self.open(&mut inner, now, &reason);
        }
    }

    fn open(&self, inner: &mut Inner, now: DateTime<Utc>, reason: &str) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(now);
        inner.times_opened += 1;
        warn!(
            reason = %reason,
            reset_after = ?self.settings.reset_timeout,
            "circuit breaker opened"
        );
    }

    fn prune(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let horizon = now - chrono_span(self.settings.rolling_window);
        while inner
            .outcomes
            .front()
            .is_some_and(|(at, _)| *at < horizon)
        {
            inner.outcomes.pop_front();
        }
    }
}

/// Admission for one call. Dropping it unfinished (the caller was
/// cancelled) counts as a failure so a trial slot is never leaked.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    finished: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            finished: false,
        }
    }

    fn finish(mut self, failed: bool) {
        self.finished = true;
        self.breaker.record(self.trial, failed);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.record(self.trial, true);
        }
    }
}
