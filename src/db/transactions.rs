//! Transaction ledger repository
//!
//! Append-only: rows are inserted and read, never updated or deleted (the
//! schema carries triggers that abort either).

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::diesel_schema::transactions;
use super::models::{NewTransaction, Transaction, TransactionType};
use crate::error::LedgerError;

// ============================================================================
// Query Types
// ============================================================================

/// Query parameters for listing a user's transactions
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionQuery {
    /// Filter by transaction type
    #[serde(default)]
    pub tx_type: Option<TransactionType>,
    /// Only transactions created at or after this timestamp
    #[serde(default)]
    pub after: Option<String>,
    /// Only transactions created before this timestamp
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

impl Default for TransactionQuery {
    fn default() -> Self {
        Self {
            tx_type: None,
            after: None,
            before: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// Per-type totals for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeTotal {
    pub tx_type: String,
    pub count: i64,
    pub amount: i64,
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get a transaction by id
pub fn get_transaction(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Transaction>, LedgerError> {
    transactions::table
        .find(id)
        .select(Transaction::as_select())
        .first(conn)
        .optional()
        .map_err(LedgerError::from)
}

/// List a user's transactions, newest first
pub fn list_transactions(
    conn: &mut SqliteConnection,
    user_id: &str,
    query: &TransactionQuery,
) -> Result<Vec<Transaction>, LedgerError> {
    let mut base_query = transactions::table
        .filter(transactions::user_id.eq(user_id))
        .select(Transaction::as_select())
        .into_boxed();

    if let Some(tx_type) = query.tx_type {
        base_query = base_query.filter(transactions::tx_type.eq(tx_type.as_str()));
    }

    if let Some(ref after) = query.after {
        base_query = base_query.filter(transactions::created_at.ge(after));
    }

    if let Some(ref before) = query.before {
        base_query = base_query.filter(transactions::created_at.lt(before));
    }

    base_query
        .order(transactions::sequence.desc())
        .limit(query.limit)
        .offset(query.offset)
        .load(conn)
        .map_err(LedgerError::from)
}

/// Full ledger for a user in application order (oldest first)
pub fn ledger_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<Transaction>, LedgerError> {
    transactions::table
        .filter(transactions::user_id.eq(user_id))
        .select(Transaction::as_select())
        .order(transactions::sequence.asc())
        .load(conn)
        .map_err(LedgerError::from)
}

/// Count a user's transactions of `tx_type` created at or after `since`
pub fn count_since(
    conn: &mut SqliteConnection,
    user_id: &str,
    tx_type: TransactionType,
    since: &str,
) -> Result<i64, LedgerError> {
    transactions::table
        .filter(transactions::user_id.eq(user_id))
        .filter(transactions::tx_type.eq(tx_type.as_str()))
        .filter(transactions::created_at.ge(since))
        .count()
        .get_result(conn)
        .map_err(LedgerError::from)
}

/// Totals grouped by transaction type
pub fn totals_by_type(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<TypeTotal>, LedgerError> {
    let rows: Vec<(String, i64)> = transactions::table
        .filter(transactions::user_id.eq(user_id))
        .select((transactions::tx_type, transactions::amount))
        .load(conn)?;

    let mut grouped: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    for (tx_type, amount) in rows {
        let entry = grouped.entry(tx_type).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += amount;
    }

    Ok(grouped
        .into_iter()
        .map(|(tx_type, (count, amount))| TypeTotal { tx_type, count, amount })
        .collect())
}

// ============================================================================
// Write Operations
// ============================================================================

/// Append a transaction row.
///
/// Callers run this inside the same immediate transaction that updated the
/// profile; `sequence` is the profile's version after that update.
pub fn insert_transaction(
    conn: &mut SqliteConnection,
    new_transaction: &NewTransaction<'_>,
) -> Result<Transaction, LedgerError> {
    diesel::insert_into(transactions::table)
        .values(new_transaction)
        .execute(conn)?;

    get_transaction(conn, new_transaction.id)?
        .ok_or_else(|| LedgerError::Internal("Failed to retrieve created transaction".into()))
}
