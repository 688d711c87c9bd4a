//! Offline keyword categorizer, used when no model endpoint is configured.

use async_trait::async_trait;

use super::{MessageInsight, SummarizeError, Summarizer, FALLBACK_CATEGORY};
use crate::provider::MailMessage;

struct CategoryPattern {
    category: &'static str,
    keywords: &'static [&'static str],
    priority: u8,
}

const PATTERNS: &[CategoryPattern] = &[
    CategoryPattern {
        category: "Security",
        keywords: &[
            "password",
            "security alert",
            "verification code",
            "sign-in",
            "suspicious",
            "2fa",
        ],
        priority: 90,
    },
    CategoryPattern {
        category: "Calendar",
        keywords: &[
            "invitation",
            "meeting",
            "calendar",
            "rescheduled",
            "agenda",
            "rsvp",
        ],
        priority: 80,
    },
    CategoryPattern {
        category: "Finance",
        keywords: &[
            "invoice",
            "receipt",
            "payment",
            "statement",
            "amount due",
            "refund",
        ],
        priority: 70,
    },
    CategoryPattern {
        category: "Travel",
        keywords: &[
            "flight",
            "boarding pass",
            "itinerary",
            "hotel",
            "reservation",
            "check-in",
        ],
        priority: 40,
    },
    CategoryPattern {
        category: "Newsletters",
        keywords: &["unsubscribe", "newsletter", "digest", "weekly roundup"],
        priority: 10,
    },
];

/// Matches subject and snippet against fixed keyword lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordSummarizer;

impl KeywordSummarizer {
    pub fn categorize(&self, message: &MailMessage) -> MessageInsight {
        let haystack = format!("{} {}", message.subject, message.snippet).to_lowercase();

        let best = PATTERNS
            .iter()
            .map(|p| {
                let hits: Vec<&str> = p
                    .keywords
                    .iter()
                    .copied()
                    .filter(|k| haystack.contains(k))
                    .collect();
                (p, hits)
            })
            .filter(|(_, hits)| !hits.is_empty())
            .max_by_key(|(p, hits)| (hits.len(), p.priority));

        let headline = if message.subject.trim().is_empty() {
            message.snippet.chars().take(80).collect()
        } else {
            message.subject.trim().to_string()
        };

        match best {
            Some((pattern, hits)) => MessageInsight {
                category: pattern.category.to_string(),
                headline,
                priority: Some(pattern.priority),
                insights: hits.iter().map(|k| format!("mentions \"{}\"", k)).collect(),
            },
            None => MessageInsight {
                category: FALLBACK_CATEGORY.to_string(),
                headline,
                priority: None,
                insights: Vec::new(),
            },
        }
    }
}

#[async_trait]
impl Summarizer for KeywordSummarizer {
    async fn summarize(&self, message: &MailMessage) -> Result<MessageInsight, SummarizeError> {
        Ok(self.categorize(message))
    }
}
