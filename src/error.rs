//! Error types for credit-ledger

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

use crate::auth::Role;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    #[error("Unauthorized: {caller_id} lacks {required} role")]
    Unauthorized { caller_id: String, required: Role },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Profile already exists: {0}")]
    ProfileExists(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Storage conflict after {attempts} attempt(s)")]
    StorageConflict { attempts: u32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown operation kind: {0}")]
    UnknownOperation(String),

    #[error("Cost catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Worth retrying with the same input
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::StorageConflict { .. })
    }

    /// Safe to surface to the end user as-is
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientFunds { .. }
                | LedgerError::Unauthorized { .. }
                | LedgerError::NotFound(_)
                | LedgerError::InvalidInput(_)
        )
    }
}

/// Busy/locked SQLite surfaces as `DatabaseErrorKind::Unknown` with the
/// sqlite message, so classification goes by message text.
fn is_lock_contention(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("database is locked") || message.contains("database is busy")
}

impl From<DieselError> for LedgerError {
    fn from(err: DieselError) -> Self {
        match &err {
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => {
                LedgerError::StorageConflict { attempts: 1 }
            }
            DieselError::DatabaseError(_, info) if is_lock_contention(info.message()) => {
                LedgerError::StorageConflict { attempts: 1 }
            }
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                LedgerError::DuplicateEntry(info.message().to_string())
            }
            DieselError::NotFound => LedgerError::NotFound("record".to_string()),
            _ => LedgerError::Database(err.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for LedgerError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        LedgerError::Pool(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(LedgerError::StorageConflict { attempts: 3 }.is_transient());
        assert!(!LedgerError::Database("boom".into()).is_transient());

        let funds = LedgerError::InsufficientFunds { balance: 70, required: 80 };
        assert!(funds.is_user_facing());
        assert_eq!(funds.to_string(), "Insufficient funds: balance 70, required 80");
        assert!(!LedgerError::Internal("x".into()).is_user_facing());
    }

    #[test]
    fn test_lock_contention_detection() {
        assert!(is_lock_contention("database is locked"));
        assert!(is_lock_contention("Database is BUSY"));
        assert!(!is_lock_contention("UNIQUE constraint failed"));
    }
}
