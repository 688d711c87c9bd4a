//! Bounded retries around a summarizer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{MessageInsight, SummarizeError, Summarizer};
use crate::config::SummarizerConfig;
use crate::provider::MailMessage;
use crate::retry::RetryPolicy;

/// Retries with capped exponential backoff. After the last attempt the
/// fallback insight is returned instead of an error.
pub struct RetryingSummarizer {
    inner: Arc<dyn Summarizer>,
    policy: RetryPolicy,
}

impl RetryingSummarizer {
    pub fn new(inner: Arc<dyn Summarizer>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn from_config(inner: Arc<dyn Summarizer>, config: &SummarizerConfig) -> Self {
        Self::new(
            inner,
            RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.base_backoff_ms),
                Duration::from_millis(config.max_backoff_ms),
            ),
        )
    }

    /// Summarizes, absorbing failures into the fallback insight.
    pub async fn summarize_or_default(&self, message: &MailMessage) -> MessageInsight {
        let result = self
            .policy
            .run("summarizer", |_| true, || self.inner.summarize(message))
            .await;
        match result {
            Ok(insight) => insight,
            Err(e) => {
                warn!(
                    message = %message.id,
                    attempts = self.policy.max_attempts(),
                    error = %e,
                    "summarizer exhausted, using fallback"
                );
                MessageInsight::fallback(message)
            }
        }
    }
}

#[async_trait]
impl Summarizer for RetryingSummarizer {
    async fn summarize(&self, message: &MailMessage) -> Result<MessageInsight, SummarizeError> {
        Ok(self.summarize_or_default(message).await)
    }
}
