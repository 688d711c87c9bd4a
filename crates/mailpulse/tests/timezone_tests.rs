//! Digest period placement in the account's timezone.

mod common;

use chrono::{NaiveDate, TimeZone, Utc};

use common::*;
use mailpulse::digest::DigestPeriod;

#[test]
fn test_pacific_morning_lands_in_second_period() {
    let h = TestHarness::new();
    // 07:30 in UTC-8.
    let at = Utc.with_ymd_and_hms(2024, 1, 15, 15, 30, 0).unwrap();
    assert_eq!(
        h.service.aggregator().locate("America/Los_Angeles", at),
        (
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            DigestPeriod::SecondHalf
        )
    );

    // An hour later it is past the second window in UTC but still morning
    // in Los Angeles.
    let later = Utc.with_ymd_and_hms(2024, 1, 15, 16, 30, 0).unwrap();
    assert_eq!(
        h.service.aggregator().locate("America/Los_Angeles", later),
        (
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            DigestPeriod::SecondHalf
        )
    );
    assert_eq!(
        h.service.aggregator().locate("UTC", later),
        (
            NaiveDate::from_ymd_opt(2024, 1, 16).unwrap(),
            DigestPeriod::FirstHalf
        )
    );
}

#[test]
fn test_local_date_not_utc_date() {
    let h = TestHarness::new();
    // 2024-01-15 23:30 UTC is 08:30 on the 16th in Tokyo.
    let at = Utc.with_ymd_and_hms(2024, 1, 15, 23, 30, 0).unwrap();
    assert_eq!(
        h.service.aggregator().locate("Asia/Tokyo", at),
        (
            NaiveDate::from_ymd_opt(2024, 1, 16).unwrap(),
            DigestPeriod::SecondHalf
        )
    );
}

#[test]
fn test_unknown_timezone_uses_default() {
    let h = TestHarness::new();
    let at = Utc.with_ymd_and_hms(2024, 1, 15, 3, 0, 0).unwrap();
    assert_eq!(
        h.service.aggregator().locate("Mars/Olympus_Mons", at),
        (
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            DigestPeriod::FirstHalf
        )
    );
}

#[tokio::test]
async fn test_messages_merge_into_account_local_digest() {
    let h = TestHarness::new();
    h.link_account("acc-la", "user-la", "la@example.com", "America/Los_Angeles", Some(10));
    // 07:30 and 06:30 Pacific on 2026-03-02.
    h.provider.deliver(
        11,
        message("m1", "T1", "Standup", Utc.with_ymd_and_hms(2026, 3, 2, 15, 30, 0).unwrap()),
    );
    h.provider.deliver(
        12,
        message("m2", "T2", "Early alert", Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap()),
    );

    let n = notification("N1", "la@example.com", 12);
    h.service.gate().admit(&n).unwrap();
    let report = h.service.process_admitted(&n).await.unwrap();
    assert_eq!(report.digests_updated, 2);

    let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let second = h
        .service
        .aggregator()
        .read("user-la", date, DigestPeriod::SecondHalf)
        .unwrap()
        .unwrap();
    let first = h
        .service
        .aggregator()
        .read("user-la", date, DigestPeriod::FirstHalf)
        .unwrap()
        .unwrap();
    assert_eq!(second.digest.total_count, 1);
    assert_eq!(first.digest.total_count, 1);
}
