//! Database schema definitions

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use tracing::info;

use super::diesel_schema::schema_version;
use crate::error::LedgerError;

/// Current schema version for migrations.
///
/// Bump when the transaction type set changes; the CHECK constraint on
/// `transactions.tx_type` is part of the schema.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new ledger schema v{}", SCHEMA_VERSION);
        conn.immediate_transaction(|conn| {
            create_tables(conn)?;
            set_schema_version(conn, SCHEMA_VERSION)
        })?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(LedgerError::Config(format!(
            "Database schema v{} is newer than this build (v{})",
            current_version, SCHEMA_VERSION
        )));
    } else {
        info!("Ledger schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
pub fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, LedgerError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL PRIMARY KEY)")
        .map_err(|e| LedgerError::Database(format!("Failed to create schema_version table: {}", e)))?;

    let version = schema_version::table
        .select(schema_version::version)
        .first::<i32>(conn)
        .optional()
        .map_err(|e| LedgerError::Database(format!("Failed to read schema_version: {}", e)))?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), LedgerError> {
    diesel::delete(schema_version::table)
        .execute(conn)
        .map_err(|e| LedgerError::Database(format!("Failed to clear schema_version: {}", e)))?;
    diesel::insert_into(schema_version::table)
        .values(schema_version::version.eq(version))
        .execute(conn)
        .map_err(|e| LedgerError::Database(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    conn.batch_execute(PROFILES_SCHEMA)
        .map_err(|e| LedgerError::Database(format!("Failed to create profiles table: {}", e)))?;

    conn.batch_execute(TRANSACTIONS_SCHEMA)
        .map_err(|e| LedgerError::Database(format!("Failed to create transactions table: {}", e)))?;

    conn.batch_execute(HOLDS_SCHEMA)
        .map_err(|e| LedgerError::Database(format!("Failed to create holds table: {}", e)))?;

    conn.batch_execute(ACTIVITY_SCHEMA)
        .map_err(|e| LedgerError::Database(format!("Failed to create activity_logs table: {}", e)))?;

    Ok(())
}

fn migrate_schema(conn: &mut SqliteConnection, from_version: i32) -> Result<(), LedgerError> {
    // No released versions below v1 yet.
    info!("No migration steps from v{}", from_version);
    set_schema_version(conn, SCHEMA_VERSION)
}

/// Profile balances: one row per user, never deleted
const PROFILES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY NOT NULL,
    role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
    balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
    total_earned INTEGER NOT NULL DEFAULT 0 CHECK (total_earned >= 0),
    total_spent INTEGER NOT NULL DEFAULT 0 CHECK (total_spent >= 0),
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_active_at TEXT NOT NULL,
    CHECK (total_earned - total_spent = balance)
);
"#;

/// Append-only transaction ledger
const TRANSACTIONS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL REFERENCES profiles(id),
    sequence INTEGER NOT NULL,
    amount INTEGER NOT NULL CHECK (amount != 0),
    tx_type TEXT NOT NULL CHECK (tx_type IN (
        'signup_bonus', 'invite_reward', 'share_reward', 'feedback_reward',
        'daily_bonus', 'analysis_spend', 'sem_cfa_spend', 'export_spend',
        'ai_interpretation_spend', 'admin_adjustment'
    )),
    description TEXT NOT NULL,
    related_id TEXT,
    balance_after INTEGER NOT NULL CHECK (balance_after >= 0),
    created_at TEXT NOT NULL,
    UNIQUE (user_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_transactions_user_created ON transactions(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_transactions_type ON transactions(tx_type);

-- At most one daily bonus per user per UTC day
CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_daily_bonus
    ON transactions(user_id, substr(created_at, 1, 10))
    WHERE tx_type = 'daily_bonus';

CREATE TRIGGER IF NOT EXISTS transactions_no_update
BEFORE UPDATE ON transactions
BEGIN
    SELECT RAISE(ABORT, 'transactions are append-only');
END;

CREATE TRIGGER IF NOT EXISTS transactions_no_delete
BEFORE DELETE ON transactions
BEGIN
    SELECT RAISE(ABORT, 'transactions are append-only');
END;
"#;

/// Reservations against available balance
const HOLDS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS holds (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL REFERENCES profiles(id),
    amount INTEGER NOT NULL CHECK (amount >= 0),
    operation_kind TEXT NOT NULL,
    related_id TEXT,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_holds_user_expiry ON holds(user_id, expires_at);
"#;

/// Non-financial usage events
const ACTIVITY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS activity_logs (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    action_type TEXT NOT NULL,
    details_json TEXT,
    points_earned INTEGER NOT NULL DEFAULT 0,
    points_spent INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_activity_user_created ON activity_logs(user_id, created_at);
"#;
