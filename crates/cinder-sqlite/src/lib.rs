//! SQLite implementation of the cinder note store.
//!
//! Visits run inside `BEGIN IMMEDIATE` transactions so the read, increment
//! and optional delete happen under one write lock. A lock that cannot be
//! taken within the busy timeout is reported as `Error::Conflict`.
//!
//! Every call runs on the blocking thread pool, so lock waits and disk I/O
//! never stall the async workers.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cinder_core::migrations::{get_pending_migrations, SCHEMA_VERSION};
use cinder_core::{ContentType, Error, Note, NoteStore, Sign, VisitOutcome};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const NOTE_COLUMNS: &str = "sign, name, content_type, max_number_visits, current_number_visits, \
     is_encrypted, encrypt_password_hash, encrypt_metadata, text";

/// SQLite-backed note store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a database at the given path and run any pending migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(storage_err)?;
        Self::init(conn)
    }

    /// Open an in-memory database and run migrations.
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, Error> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(storage_err)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        lock(&self.conn)
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn call<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Connection) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::Internal(format!("sqlite task failed: {}", e)))?
    }

    /// Run any pending database migrations.
    fn run_migrations(&self) -> Result<(), Error> {
        let mut conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _cinder_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(storage_err)?;

        let current_version: i64 = conn
            .query_row(
                "SELECT value FROM _cinder_meta WHERE key = 'schema_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(storage_err)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            return Ok(());
        }

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err)?;
        for migration in get_pending_migrations(current_version) {
            tracing::info!(version = migration.version, name = migration.name, "applying migration");
            for statement in migration.statements {
                tx.execute(statement, []).map_err(|e| {
                    Error::Storage(format!("migration {} failed: {}", migration.name, e))
                })?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO _cinder_meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;

        Ok(())
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, Error> {
    conn.lock()
        .map_err(|_| Error::Storage("sqlite connection lock poisoned".into()))
}

/// Lock contention is transient, everything else is a storage failure.
fn storage_err(e: rusqlite::Error) -> Error {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Error::Conflict(e.to_string()),
        _ => Error::Storage(e.to_string()),
    }
}

/// A `notes` row before validation.
struct NoteRow {
    sign: String,
    name: String,
    content_type: String,
    max_number_visits: Option<u32>,
    current_number_visits: u32,
    is_encrypted: bool,
    encrypt_password_hash: Option<String>,
    encrypt_metadata: Option<String>,
    text: Vec<u8>,
}

impl NoteRow {
    fn into_note(self) -> Result<Note, Error> {
        let sign = Sign::parse(&self.sign)
            .map_err(|e| Error::Storage(format!("stored sign is malformed: {}", e)))?;
        Note::from_parts(
            sign,
            self.name,
            ContentType::parse(&self.content_type)?,
            self.max_number_visits,
            self.current_number_visits,
            self.is_encrypted,
            self.encrypt_password_hash,
            self.encrypt_metadata,
            self.text,
        )
    }
}

fn select_note(conn: &Connection, sign: &Sign) -> Result<Option<Note>, Error> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM notes WHERE sign = ?1", NOTE_COLUMNS),
            params![sign.as_str()],
            |row| {
                Ok(NoteRow {
                    sign: row.get(0)?,
                    name: row.get(1)?,
                    content_type: row.get(2)?,
                    max_number_visits: row.get(3)?,
                    current_number_visits: row.get(4)?,
                    is_encrypted: row.get(5)?,
                    encrypt_password_hash: row.get(6)?,
                    encrypt_metadata: row.get(7)?,
                    text: row.get(8)?,
                })
            },
        )
        .optional()
        .map_err(storage_err)?;

    row.map(NoteRow::into_note).transpose()
}

#[async_trait::async_trait]
impl NoteStore for SqliteStore {
    async fn insert_if_absent(&self, note: &Note) -> Result<bool, Error> {
        let note = note.clone();
        self.call(move |conn| {
            let (hash, metadata) = note.encryption_columns();
            let rows = conn
                .execute(
                    &format!(
                        "INSERT INTO notes ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                         ON CONFLICT(sign) DO NOTHING",
                        NOTE_COLUMNS
                    ),
                    params![
                        note.sign.as_str(),
                        note.name,
                        note.content_type.as_str(),
                        note.max_number_visits,
                        note.current_number_visits,
                        note.is_encrypted(),
                        hash,
                        metadata,
                        note.text,
                    ],
                )
                .map_err(storage_err)?;
            Ok(rows == 1)
        })
        .await
    }

    async fn contains(&self, sign: &Sign) -> Result<bool, Error> {
        let sign = sign.clone();
        self.call(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM notes WHERE sign = ?1)",
                params![sign.as_str()],
                |row| row.get(0),
            )
            .map_err(storage_err)
        })
        .await
    }

    async fn get(&self, sign: &Sign) -> Result<Option<Note>, Error> {
        let sign = sign.clone();
        self.call(move |conn| select_note(conn, &sign)).await
    }

    async fn record_visit(&self, sign: &Sign) -> Result<VisitOutcome, Error> {
        let sign = sign.clone();
        self.call(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(storage_err)?;

            let Some(mut note) = select_note(&tx, &sign)? else {
                return Ok(VisitOutcome::Missing);
            };

            let outcome = if note.consume_visit() {
                tx.execute("DELETE FROM notes WHERE sign = ?1", params![sign.as_str()])
                    .map_err(storage_err)?;
                VisitOutcome::Deleted(note)
            } else {
                tx.execute(
                    "UPDATE notes SET current_number_visits = ?1 WHERE sign = ?2",
                    params![note.current_number_visits, sign.as_str()],
                )
                .map_err(storage_err)?;
                VisitOutcome::Visited(note)
            };

            tx.commit().map_err(storage_err)?;
            Ok(outcome)
        })
        .await
    }

    async fn delete(&self, sign: &Sign) -> Result<bool, Error> {
        let sign = sign.clone();
        self.call(move |conn| {
            let rows = conn
                .execute("DELETE FROM notes WHERE sign = ?1", params![sign.as_str()])
                .map_err(storage_err)?;
            Ok(rows > 0)
        })
        .await
    }

    async fn count(&self) -> Result<u64, Error> {
        self.call(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))
                .map_err(storage_err)?;
            Ok(count as u64)
        })
        .await
    }
}
