//! Digest repository: `digests` table.
//!
//! The merge path reads and writes inside one transaction, so `find` and
//! `upsert` take a `&Connection`.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw digest row. `buckets` holds the JSON-encoded category buckets.
#[derive(Debug, Clone)]
pub struct DigestRow {
    pub id: String,
    pub user_id: String,
    pub digest_date: String,
    pub period: String,
    pub buckets: String,
    pub total_count: i64,
    pub status: String,
    pub cache_duration_hours: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl DigestRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            digest_date: row.get("digest_date")?,
            period: row.get("period")?,
            buckets: row.get("buckets")?,
            total_count: row.get("total_count")?,
            status: row.get("status")?,
            cache_duration_hours: row.get("cache_duration_hours")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Finds the digest for a `(user, date, period)` key.
pub fn find(
    conn: &Connection,
    user_id: &str,
    digest_date: &str,
    period: &str,
) -> Result<Option<DigestRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM digests WHERE user_id = ?1 AND digest_date = ?2 AND period = ?3",
            params![user_id, digest_date, period],
            DigestRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Inserts a digest or replaces the mutable columns of the existing one.
///
/// `id`, `created_at` and `cache_duration_hours` of an existing row are kept.
pub fn upsert(conn: &Connection, row: &DigestRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO digests (id, user_id, digest_date, period, buckets, total_count, status,
         cache_duration_hours, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(user_id, digest_date, period) DO UPDATE SET
           buckets = ?5,
           total_count = ?6,
           status = ?7,
           updated_at = ?10",
        params![
            row.id,
            row.user_id,
            row.digest_date,
            row.period,
            row.buckets,
            row.total_count,
            row.status,
            row.cache_duration_hours,
            row.created_at,
            row.updated_at,
        ],
    )?;
    Ok(())
}

/// Sets the status of an existing digest. Returns `false` if it does not exist.
pub fn set_status(
    db: &Database,
    user_id: &str,
    digest_date: &str,
    period: &str,
    status: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE digests SET status = ?4, updated_at = ?5
             WHERE user_id = ?1 AND digest_date = ?2 AND period = ?3",
            params![user_id, digest_date, period, status, now],
        )?;
        Ok(changed == 1)
    })
}
