//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order, each inside its own transaction.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_mailbox_accounts_table",
        sql: include_str!("sql/001_create_mailbox_accounts.sql"),
    },
    Migration {
        version: 2,
        description: "create_inbound_notifications_table",
        sql: include_str!("sql/002_create_inbound_notifications.sql"),
    },
    Migration {
        version: 3,
        description: "create_processed_messages_table",
        sql: include_str!("sql/003_create_processed_messages.sql"),
    },
    Migration {
        version: 4,
        description: "create_digests_table",
        sql: include_str!("sql/004_create_digests.sql"),
    },
    Migration {
        version: 5,
        description: "create_oauth_tokens_table",
        sql: include_str!("sql/005_create_oauth_tokens.sql"),
    },
    Migration {
        version: 6,
        description: "create_sync_stats_table",
        sql: include_str!("sql/006_create_sync_stats.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let batch = format!(
            "BEGIN;\n{}\nINSERT INTO _migrations (version, description) VALUES ({}, '{}');\nCOMMIT;",
            migration.sql, migration.version, migration.description
        );
        if let Err(e) = conn.execute_batch(&batch) {
            // Leave the connection usable if the batch failed mid-way.
            let _ = conn.execute_batch("ROLLBACK;");
            return Err(DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            });
        }
    }

    Ok(())
}
