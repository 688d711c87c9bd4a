use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use log::{debug, info};
use uuid::Uuid;

use super::merge::merge_buckets;
use super::model::{total_count, CategoryBuckets, Digest, DigestPeriod, DigestRead, DigestStatus};
use super::window::{resolve_timezone, PeriodWindows};
use crate::clock::Clock;
use crate::config::DigestConfig;
use crate::db::{self, digest_repo, Database, DatabaseError};
use crate::error::ConfigError;
use crate::events::{SyncEventBroadcaster, SyncEventKind};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Folds summaries into digest rows.
///
/// Each merge is a read-modify-write inside one IMMEDIATE transaction on the
/// shared connection, so merges for the same key never interleave.
pub struct DigestAggregator {
    db: Database,
    windows: PeriodWindows,
    default_timezone: Tz,
    cache_duration_hours: u32,
    clock: Arc<dyn Clock>,
    events: SyncEventBroadcaster,
}

impl DigestAggregator {
    pub fn new(
        db: Database,
        windows: PeriodWindows,
        default_timezone: Tz,
        cache_duration_hours: u32,
        clock: Arc<dyn Clock>,
        events: SyncEventBroadcaster,
    ) -> Self {
        Self {
            db,
            windows,
            default_timezone,
            cache_duration_hours,
            clock,
            events,
        }
    }

    pub fn from_config(
        db: Database,
        config: &DigestConfig,
        clock: Arc<dyn Clock>,
        events: SyncEventBroadcaster,
    ) -> Result<Self, ConfigError> {
        let default_timezone =
            config
                .default_timezone
                .parse::<Tz>()
                .map_err(|_| ConfigError::InvalidTimezone {
                    name: config.default_timezone.clone(),
                })?;
        Ok(Self::new(
            db,
            PeriodWindows::from_config(config)?,
            default_timezone,
            config.cache_duration_hours,
            clock,
            events,
        ))
    }

    /// Digest key for a moment, in the named timezone.
    pub fn locate(&self, timezone: &str, at: DateTime<Utc>) -> (NaiveDate, DigestPeriod) {
        let tz = resolve_timezone(timezone, self.default_timezone);
        self.windows.locate(at, tz)
    }

    /// Merges `incoming` into the digest for the key, creating it if absent.
    pub fn merge(
        &self,
        user_id: &str,
        date: NaiveDate,
        period: DigestPeriod,
        incoming: CategoryBuckets,
    ) -> Result<Digest, DatabaseError> {
        let now = self.clock.now();
        let date_key = date.format(DATE_FORMAT).to_string();

        let row = self.db.with_transaction(|conn| {
            let existing = digest_repo::find(conn, user_id, &date_key, period.as_str())?;

            let (base, id, created_at, cache_hours) = match &existing {
                Some(row) => (
                    serde_json::from_str::<CategoryBuckets>(&row.buckets)?,
                    row.id.clone(),
                    row.created_at.clone(),
                    row.cache_duration_hours,
                ),
                None => (
                    CategoryBuckets::new(),
                    Uuid::new_v4().to_string(),
                    db::timestamp(now),
                    i64::from(self.cache_duration_hours),
                ),
            };

            let merged = merge_buckets(&base, incoming);
            let row = digest_repo::DigestRow {
                id,
                user_id: user_id.to_string(),
                digest_date: date_key.clone(),
                period: period.as_str().to_string(),
                total_count: total_count(&merged) as i64,
                buckets: serde_json::to_string(&merged)?,
                status: DigestStatus::Completed.as_str().to_string(),
                cache_duration_hours: cache_hours,
                created_at,
                updated_at: db::timestamp(now),
            };
            digest_repo::upsert(conn, &row)?;

            if existing.is_some() {
                debug!("Merged into digest {} for user {}", row.id, user_id);
            } else {
                info!(
                    "Created digest {} for user {} ({} {})",
                    row.id, user_id, date_key, period
                );
            }
            Ok::<_, DatabaseError>(row)
        })?;

        let digest = to_digest(row)?;
        self.events.send(SyncEventKind::DigestUpdated {
            user_id: user_id.to_string(),
            digest_date: date_key,
            period: period.as_str().to_string(),
            total_count: digest.total_count,
        });
        Ok(digest)
    }

    /// Reads a digest. A stale digest is still returned, flagged, and a
    /// regeneration request is published.
    pub fn read(
        &self,
        user_id: &str,
        date: NaiveDate,
        period: DigestPeriod,
    ) -> Result<Option<DigestRead>, DatabaseError> {
        let date_key = date.format(DATE_FORMAT).to_string();
        let row = self
            .db
            .with_conn(|conn| digest_repo::find(conn, user_id, &date_key, period.as_str()))?;
        let Some(row) = row else {
            return Ok(None);
        };

        let digest = to_digest(row)?;
        let stale = digest.is_stale(self.clock.now());
        if stale {
            debug!("Digest {} is stale, requesting regeneration", digest.id);
            self.events.send(SyncEventKind::DigestRegenerationRequested {
                user_id: user_id.to_string(),
                digest_date: date_key,
                period: period.as_str().to_string(),
            });
        }
        Ok(Some(DigestRead { digest, stale }))
    }

    pub fn mark_failed(
        &self,
        user_id: &str,
        date: NaiveDate,
        period: DigestPeriod,
    ) -> Result<bool, DatabaseError> {
        digest_repo::set_status(
            &self.db,
            user_id,
            &date.format(DATE_FORMAT).to_string(),
            period.as_str(),
            DigestStatus::Failed.as_str(),
            &db::timestamp(self.clock.now()),
        )
    }
}

fn corrupt(reason: String) -> DatabaseError {
    DatabaseError::CorruptRow {
        table: "digests",
        reason,
    }
}

fn to_digest(row: digest_repo::DigestRow) -> Result<Digest, DatabaseError> {
    let buckets: CategoryBuckets = serde_json::from_str(&row.buckets)?;
    Ok(Digest {
        date: NaiveDate::parse_from_str(&row.digest_date, DATE_FORMAT)
            .map_err(|e| corrupt(format!("invalid digest_date '{}': {}", row.digest_date, e)))?,
        period: row.period.parse().map_err(corrupt)?,
        status: row.status.parse().map_err(corrupt)?,
        // Always derived from the buckets, never trusted from the column.
        total_count: total_count(&buckets),
        buckets,
        cache_duration_hours: u32::try_from(row.cache_duration_hours).map_err(|_| {
            corrupt(format!(
                "invalid cache_duration_hours {}",
                row.cache_duration_hours
            ))
        })?,
        created_at: db::parse_timestamp("digests", &row.created_at)?,
        updated_at: db::parse_timestamp("digests", &row.updated_at)?,
        id: row.id,
        user_id: row.user_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::digest::model::SummaryEntry;
    use chrono::{Duration, TimeZone};

    fn entry(id: &str, priority: Option<u8>) -> SummaryEntry {
        SummaryEntry {
            source_message_id: id.to_string(),
            subject: format!("subject {}", id),
            sender: "sender@example.com".to_string(),
            headline: format!("headline {}", id),
            priority,
            insights: vec![],
        }
    }

    fn aggregator() -> (DigestAggregator, ManualClock, SyncEventBroadcaster) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
        let events = SyncEventBroadcaster::new(32);
        let config = DigestConfig {
            cache_duration_hours: 4,
            ..DigestConfig::default()
        };
        let aggregator = DigestAggregator::from_config(
            Database::open_in_memory().unwrap(),
            &config,
            Arc::new(clock.clone()),
            events.clone(),
        )
        .unwrap();
        (aggregator, clock, events)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    #[test]
    fn test_first_merge_creates_digest() {
        let (aggregator, _clock, _events) = aggregator();
        let digest = aggregator
            .merge(
                "u1",
                day(),
                DigestPeriod::SecondHalf,
                CategoryBuckets::from([
                    ("Calendar".to_string(), vec![entry("m1", Some(80))]),
                    ("Travel".to_string(), vec![entry("m2", Some(40))]),
                ]),
            )
            .unwrap();

        assert_eq!(digest.buckets.len(), 2);
        assert_eq!(digest.total_count, 2);
        assert_eq!(digest.status, DigestStatus::Completed);
        assert_eq!(digest.cache_duration_hours, 4);
    }

    #[test]
    fn test_second_merge_unions_and_keeps_identity() {
        let (aggregator, clock, _events) = aggregator();
        let first = aggregator
            .merge(
                "u1",
                day(),
                DigestPeriod::FirstHalf,
                CategoryBuckets::from([(
                    "A".to_string(),
                    vec![entry("m1", Some(30)), entry("m2", Some(70))],
                )]),
            )
            .unwrap();

        clock.advance(Duration::minutes(10));
        let second = aggregator
            .merge(
                "u1",
                day(),
                DigestPeriod::FirstHalf,
                CategoryBuckets::from([(
                    "A".to_string(),
                    vec![entry("m2", Some(70)), entry("m3", Some(90))],
                )]),
            )
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        let ids: Vec<&str> = second.buckets["A"]
            .iter()
            .map(|e| e.source_message_id.as_str())
            .collect();
        assert_eq!(ids, vec!["m3", "m2", "m1"]);
        assert_eq!(second.total_count, 3);
    }

    #[test]
    fn test_periods_are_separate_digests() {
        let (aggregator, _clock, _events) = aggregator();
        let bucket = || CategoryBuckets::from([("A".to_string(), vec![entry("m1", None)])]);
        let a = aggregator
            .merge("u1", day(), DigestPeriod::FirstHalf, bucket())
            .unwrap();
        let b = aggregator
            .merge("u1", day(), DigestPeriod::SecondHalf, bucket())
            .unwrap();
        assert_ne!(a.id, b.id);
        let first = aggregator.read("u1", day(), DigestPeriod::FirstHalf).unwrap().unwrap();
        let second = aggregator.read("u1", day(), DigestPeriod::SecondHalf).unwrap().unwrap();
        assert_eq!(first.digest.id, a.id);
        assert_eq!(second.digest.id, b.id);
    }

    #[tokio::test]
    async fn test_stale_read_flags_and_requests_regeneration() {
        let (aggregator, clock, events) = aggregator();
        let mut rx = events.subscribe();
        aggregator
            .merge(
                "u1",
                day(),
                DigestPeriod::FirstHalf,
                CategoryBuckets::from([("A".to_string(), vec![entry("m1", None)])]),
            )
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap().kind,
            SyncEventKind::DigestUpdated { total_count: 1, .. }
        ));

        let fresh = aggregator
            .read("u1", day(), DigestPeriod::FirstHalf)
            .unwrap()
            .unwrap();
        assert!(!fresh.stale);

        clock.advance(Duration::hours(4) + Duration::seconds(1));
        let stale = aggregator
            .read("u1", day(), DigestPeriod::FirstHalf)
            .unwrap()
            .unwrap();
        assert!(stale.stale);
        assert_eq!(stale.digest.total_count, 1);
        assert!(matches!(
            rx.recv().await.unwrap().kind,
            SyncEventKind::DigestRegenerationRequested { .. }
        ));
    }

    #[test]
    fn test_read_missing_and_mark_failed() {
        let (aggregator, _clock, _events) = aggregator();
        assert!(aggregator
            .read("u1", day(), DigestPeriod::FirstHalf)
            .unwrap()
            .is_none());
        assert!(!aggregator
            .mark_failed("u1", day(), DigestPeriod::FirstHalf)
            .unwrap());

        aggregator
            .merge("u1", day(), DigestPeriod::FirstHalf, CategoryBuckets::new())
            .unwrap();
        assert!(aggregator
            .mark_failed("u1", day(), DigestPeriod::FirstHalf)
            .unwrap());
        let read = aggregator
            .read("u1", day(), DigestPeriod::FirstHalf)
            .unwrap()
            .unwrap();
        assert_eq!(read.digest.status, DigestStatus::Failed);
    }

    #[test]
    fn test_locate_uses_account_timezone() {
        let (aggregator, _clock, _events) = aggregator();
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 15, 30, 0).unwrap();
        assert_eq!(
            aggregator.locate("America/Los_Angeles", at),
            (
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                DigestPeriod::SecondHalf
            )
        );
        // Unknown names fall back to the configured default (UTC).
        assert_eq!(
            aggregator.locate("Not/AZone", at).1,
            DigestPeriod::SecondHalf
        );
    }
}
