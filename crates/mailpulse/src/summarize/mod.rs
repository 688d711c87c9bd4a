//! Categorization and summarization of individual messages.

pub mod keyword;
pub mod llm;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::MailMessage;

pub use keyword::KeywordSummarizer;
pub use llm::LlmSummarizer;
pub use retry::RetryingSummarizer;

/// Category used when nothing better is known.
pub const FALLBACK_CATEGORY: &str = "Other";

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("Summarizer unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to parse summarizer response: {0}")]
    ResponseParse(String),
}

/// What the summarizer concluded about one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInsight {
    pub category: String,
    pub headline: String,
    /// 0-100, higher is more urgent.
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub insights: Vec<String>,
}

impl MessageInsight {
    /// The neutral result used when summarization is exhausted.
    pub fn fallback(message: &MailMessage) -> Self {
        Self {
            category: FALLBACK_CATEGORY.to_string(),
            headline: message.subject.clone(),
            priority: None,
            insights: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, message: &MailMessage) -> Result<MessageInsight, SummarizeError>;
}
