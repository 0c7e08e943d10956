//! SQLite storage for the credit ledger
//!
//! ## Tables
//!
//! - `profiles` - One balance row per user (balance, lifetime totals, role)
//! - `transactions` - Append-only ledger, each row snapshots `balance_after`
//! - `holds` - Reservations against available balance
//! - `activity_logs` - Non-financial usage events
//!
//! ## Concurrency
//!
//! Every balance-changing unit of work runs inside `BEGIN IMMEDIATE`, which
//! takes the database write lock before the first read. The read, the profile
//! update and the transaction insert are therefore serialized against any
//! other writer, in this process or another one sharing the file. Lock
//! contention that outlasts `busy_timeout` surfaces as
//! [`LedgerError::StorageConflict`] and is retried a bounded number of times
//! by [`LedgerDb::write_atomic`].

pub mod activity_logs;
pub mod diesel_schema;
pub mod holds;
pub mod models;
pub mod profiles;
pub mod schema;
pub mod transactions;

use std::path::Path;
use std::thread;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, info, warn};

use crate::error::LedgerError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection SQLite settings applied when the pool hands out a connection
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    pub busy_timeout: Duration,
    pub enable_wal: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5_000),
            enable_wal: true,
        }
    }
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        let mut pragmas = format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        );
        if self.enable_wal {
            pragmas.push_str(" PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
        }
        conn.batch_execute(&pragmas)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled SQLite database holding the ledger
#[derive(Clone)]
pub struct LedgerDb {
    pool: DbPool,
}

impl LedgerDb {
    /// Open or create the ledger database file
    pub fn open(db_path: &Path, pool_size: u32, options: ConnectionOptions) -> Result<Self, LedgerError> {
        info!("Opening ledger database at {:?}", db_path);

        let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_customizer(Box::new(options))
            .build(manager)?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    ///
    /// Each SQLite in-memory connection is its own database, so the pool is
    /// capped at one connection.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        debug!("Opening in-memory ledger database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .connection_customizer(Box::new(ConnectionOptions {
                enable_wal: false,
                ..Default::default()
            }))
            .build(manager)?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        schema::init_schema(&mut conn)
    }

    /// Check out a pooled connection
    pub fn conn(&self) -> Result<DbConn, LedgerError> {
        Ok(self.pool.get()?)
    }

    /// Run a read (or a non-financial write) on a pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, LedgerError>,
    {
        let mut conn = self.conn()?;
        f(&mut conn)
    }

    /// Run `f` as one serialized write unit (`BEGIN IMMEDIATE`).
    ///
    /// Any `Err` rolls the whole unit back. `StorageConflict` is retried up
    /// to `max_attempts` times in total with linear backoff; every other
    /// error is returned on first occurrence.
    pub fn write_atomic<F, T>(&self, max_attempts: u32, mut f: F) -> Result<T, LedgerError>
    where
        F: FnMut(&mut SqliteConnection) -> Result<T, LedgerError>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self
                .conn()
                .and_then(|mut conn| conn.immediate_transaction(|conn| f(conn)));

            match result {
                Err(LedgerError::StorageConflict { .. }) if attempt < max_attempts => {
                    debug!(attempt, max_attempts, "Write conflict, retrying");
                    thread::sleep(Duration::from_millis(10 * u64::from(attempt)));
                }
                Err(LedgerError::StorageConflict { .. }) => {
                    warn!(attempts = attempt, "Write conflict persisted, giving up");
                    return Err(LedgerError::StorageConflict { attempts: attempt });
                }
                other => return other,
            }
        }
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, LedgerError> {
        use diesel_schema::{holds, profiles, transactions};

        self.with_conn(|conn| {
            let profile_count: i64 = profiles::table.count().get_result(conn)?;
            let transaction_count: i64 = transactions::table.count().get_result(conn)?;
            let hold_count: i64 = holds::table.count().get_result(conn)?;

            Ok(DbStats {
                profile_count: profile_count as u64,
                transaction_count: transaction_count as u64,
                hold_count: hold_count as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub profile_count: u64,
    pub transaction_count: u64,
    pub hold_count: u64,
}

// Re-exports
pub use models::{Hold, Profile, Transaction, TransactionType};
pub use transactions::TransactionQuery;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_creates_schema() {
        let db = LedgerDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.profile_count, 0);
        assert_eq!(stats.transaction_count, 0);
    }

    #[test]
    fn test_open_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        LedgerDb::open(&path, 2, ConnectionOptions::default()).unwrap();
        let db = LedgerDb::open(&path, 2, ConnectionOptions::default()).unwrap();
        let version = db.with_conn(|conn| schema::get_schema_version(conn)).unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_write_atomic_rolls_back_on_error() {
        let db = LedgerDb::open_in_memory().unwrap();
        let result: Result<(), LedgerError> = db.write_atomic(3, |conn| {
            profiles::insert_profile(conn, "alice", crate::auth::Role::User, "2026-01-01T00:00:00.000Z")?;
            Err(LedgerError::InvalidInput("abort".into()))
        });
        assert!(result.is_err());
        let found = db.with_conn(|conn| profiles::get_profile(conn, "alice")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_write_atomic_gives_up_after_bounded_conflicts() {
        let db = LedgerDb::open_in_memory().unwrap();
        let mut calls = 0;
        let result: Result<(), LedgerError> = db.write_atomic(3, |_| {
            calls += 1;
            Err(LedgerError::StorageConflict { attempts: 1 })
        });
        assert!(matches!(result, Err(LedgerError::StorageConflict { attempts: 3 })));
        assert_eq!(calls, 3);
    }
}
