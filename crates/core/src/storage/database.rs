use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use tracing::info;

use crate::errors::CoreError;

use super::migrations;

/// SQLite database wrapper shared by every repository.
///
/// One connection behind a mutex. Closures passed to [`with_conn`](Self::with_conn)
/// and [`with_transaction`](Self::with_transaction) run synchronously while the
/// lock is held, so no write is ever split across an `.await`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) a database file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;

        // WAL lets readers proceed while a sync writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        info!(path = %path.display(), "Opened database");
        Self::init(conn)
    }

    /// Fresh private in-memory database (tests, ephemeral sessions).
    pub fn open_in_memory() -> Result<Self, CoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction; commits on `Ok`, rolls back on `Err`.
    pub(crate) fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Names of applied migrations, in application order.
    pub fn applied_migrations(&self) -> Result<Vec<String>, CoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM migrations ORDER BY id")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
    }
}

/// Whether an error is a UNIQUE or PRIMARY KEY violation.
pub(crate) fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Read a TEXT column and parse it into a domain type.
pub(crate) fn decode<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: impl FnOnce(&str) -> Result<T, CoreError>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_uuid(raw: &str) -> Result<uuid::Uuid, CoreError> {
    uuid::Uuid::parse_str(raw)
        .map_err(|e| CoreError::Deserialization(format!("Invalid id '{raw}': {e}")))
}
