//! Embedded database migrations for the SQLite backend.
//!
//! The schema version is tracked in the `_cinder_meta` table and pending
//! migrations run when the store is opened.

/// Current schema version. Increment when adding new migrations.
pub const SCHEMA_VERSION: i64 = 1;

/// A database migration with version number and SQL statements.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

/// All migrations in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        statements: &[
            "CREATE TABLE IF NOT EXISTS _cinder_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS notes (
                key INTEGER PRIMARY KEY AUTOINCREMENT,
                sign TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                content_type TEXT NOT NULL DEFAULT 'text',
                max_number_visits INTEGER,
                current_number_visits INTEGER NOT NULL DEFAULT 0,
                is_encrypted INTEGER NOT NULL DEFAULT 0,
                encrypt_password_hash TEXT,
                encrypt_metadata TEXT,
                text BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                CHECK (
                    (is_encrypted = 0 AND encrypt_password_hash IS NULL AND encrypt_metadata IS NULL)
                    OR (is_encrypted = 1 AND encrypt_password_hash IS NOT NULL AND encrypt_metadata IS NOT NULL)
                )
            )",
        ],
    },
];

/// Get migrations that need to be applied given the current version.
pub fn get_pending_migrations(current_version: i64) -> Vec<&'static Migration> {
    MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version)
        .collect()
}
