use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Half of a local day a digest covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestPeriod {
    FirstHalf,
    SecondHalf,
}

impl DigestPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestPeriod::FirstHalf => "first_half",
            DigestPeriod::SecondHalf => "second_half",
        }
    }
}

impl fmt::Display for DigestPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_half" => Ok(DigestPeriod::FirstHalf),
            "second_half" => Ok(DigestPeriod::SecondHalf),
            other => Err(format!("unknown digest period '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestStatus {
    Pending,
    Completed,
    Failed,
}

impl DigestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestStatus::Pending => "pending",
            DigestStatus::Completed => "completed",
            DigestStatus::Failed => "failed",
        }
    }
}

impl FromStr for DigestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DigestStatus::Pending),
            "completed" => Ok(DigestStatus::Completed),
            "failed" => Ok(DigestStatus::Failed),
            other => Err(format!("unknown digest status '{}'", other)),
        }
    }
}

/// One summarized message inside a category bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryEntry {
    pub source_message_id: String,
    pub subject: String,
    pub sender: String,
    pub headline: String,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub insights: Vec<String>,
}

/// Category name to its summaries, highest priority first.
pub type CategoryBuckets = BTreeMap<String, Vec<SummaryEntry>>;

pub fn total_count(buckets: &CategoryBuckets) -> usize {
    buckets.values().map(Vec::len).sum()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Digest {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub period: DigestPeriod,
    pub buckets: CategoryBuckets,
    pub total_count: usize,
    pub status: DigestStatus,
    pub cache_duration_hours: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Digest {
    pub fn bucket_counts(&self) -> BTreeMap<&str, usize> {
        self.buckets
            .iter()
            .map(|(category, entries)| (category.as_str(), entries.len()))
            .collect()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::hours(i64::from(self.cache_duration_hours))
    }

    /// Read-time expiry; stale digests are kept, not deleted.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }
}

/// A digest as seen by a reader.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestRead {
    pub digest: Digest,
    pub stale: bool,
}
