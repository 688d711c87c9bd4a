//! Summarizer backed by an OpenAI-compatible chat completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{MessageInsight, SummarizeError, Summarizer};
use crate::provider::MailMessage;

const SYSTEM_PROMPT: &str = "You triage email. Reply with a single JSON object: \
{\"category\": short title-case category such as Calendar, Travel, Finance, Security, Newsletters, \
\"headline\": one-line summary, \"priority\": integer 0-100 where higher is more urgent, \
\"insights\": array of at most three short strings}.";

/// Snippets are cut to keep prompts small.
const MAX_SNIPPET_CHARS: usize = 1_000;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct RawInsight {
    category: String,
    #[serde(default)]
    headline: String,
    #[serde(default)]
    priority: Option<f64>,
    #[serde(default)]
    insights: Vec<String>,
}

pub struct LlmSummarizer {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

impl LlmSummarizer {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<SecretString>,
        request_timeout: Duration,
    ) -> Result<Self, SummarizeError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SummarizeError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
        })
    }
}

/// Pulls the first JSON object out of a model reply, tolerating code fences
/// and surrounding prose.
fn extract_json(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}

fn parse_insight(content: &str, message: &MailMessage) -> Result<MessageInsight, SummarizeError> {
    let json_str = extract_json(content).ok_or_else(|| {
        SummarizeError::ResponseParse(format!("no JSON object in reply: {}", content))
    })?;
    let raw: RawInsight = serde_json::from_str(json_str)
        .map_err(|e| SummarizeError::ResponseParse(format!("{}: {}", e, json_str)))?;

    let category = raw.category.trim();
    if category.is_empty() {
        return Err(SummarizeError::ResponseParse("empty category".to_string()));
    }

    Ok(MessageInsight {
        category: category.to_string(),
        headline: if raw.headline.trim().is_empty() {
            message.subject.clone()
        } else {
            raw.headline.trim().to_string()
        },
        priority: raw.priority.map(|p| p.round().clamp(0.0, 100.0) as u8),
        insights: raw.insights.into_iter().take(3).collect(),
    })
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, message: &MailMessage) -> Result<MessageInsight, SummarizeError> {
        let snippet: String = message.snippet.chars().take(MAX_SNIPPET_CHARS).collect();
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": format!("From: {}\nSubject: {}\n\n{}", message.from, message.subject, snippet),
                },
            ],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SummarizeError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            return Err(SummarizeError::Unavailable(format!("{}: {}", status, detail)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| SummarizeError::ResponseParse(e.to_string()))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| SummarizeError::ResponseParse("no choices".to_string()))?;

        debug!(message = %message.id, "summarizer replied");
        parse_insight(&content, message)
    }
}
