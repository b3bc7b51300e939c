//! SQLite storage bootstrap, schema migrations, and the unit-of-work helper.
//!
//! # Responsibility
//! - Open and configure SQLite connections for Waypoint core.
//! - Apply schema migrations in deterministic order.
//! - Provide the transaction wrapper callers put around engine operations.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Core code must not read/write application data before migrations
//!   succeed.
//! - Repositories never open transactions themselves; atomicity belongs to
//!   the unit of work at the call boundary.

use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Runs one engine operation inside a transaction on the shared connection.
///
/// Commits when the closure returns `Ok`, rolls back when it returns `Err`
/// or panics. Repositories deliberately never nest transactions, so any
/// multi-write operation (roadmap application, a lifecycle transition plus
/// its due-date propagation) stays atomic exactly when the caller wraps it
/// here.
pub fn unit_of_work<T, E, F>(conn: &Connection, op: F) -> Result<T, E>
where
    E: From<DbError>,
    F: FnOnce(&Connection) -> Result<T, E>,
{
    let tx = conn
        .unchecked_transaction()
        .map_err(|err| E::from(DbError::Sqlite(err)))?;
    let value = op(&tx)?;
    tx.commit().map_err(|err| E::from(DbError::Sqlite(err)))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::{open_db_in_memory, unit_of_work, DbError};
    use rusqlite::Connection;

    fn row_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM roadmaps;", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn unit_of_work_commits_on_ok() {
        let conn = open_db_in_memory().unwrap();
        unit_of_work::<_, DbError, _>(&conn, |conn| {
            conn.execute(
                "INSERT INTO roadmaps (id, title) VALUES ('r1', 'Senior Year');",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        assert_eq!(row_count(&conn), 1);
    }

    #[test]
    fn unit_of_work_rolls_back_on_err() {
        let conn = open_db_in_memory().unwrap();
        let result = unit_of_work::<(), DbError, _>(&conn, |conn| {
            conn.execute(
                "INSERT INTO roadmaps (id, title) VALUES ('r1', 'Senior Year');",
                [],
            )?;
            Err(DbError::UnsupportedSchemaVersion {
                db_version: 9,
                latest_supported: 1,
            })
        });
        assert!(result.is_err());
        assert_eq!(row_count(&conn), 0);
    }
}
