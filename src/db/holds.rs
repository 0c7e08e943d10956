//! Hold (reservation) repository
//!
//! A hold earmarks part of a balance for work that has not finished yet.
//! Holds never change `profiles.balance`; they only shrink what is available
//! to other debits until committed, released or expired.

use diesel::prelude::*;

use super::diesel_schema::holds;
use super::models::{Hold, NewHold};
use crate::error::LedgerError;

/// Get a hold by id
pub fn get_hold(conn: &mut SqliteConnection, id: &str) -> Result<Option<Hold>, LedgerError> {
    holds::table
        .find(id)
        .select(Hold::as_select())
        .first(conn)
        .optional()
        .map_err(LedgerError::from)
}

/// Sum of a user's holds still active at `now`
pub fn active_total(conn: &mut SqliteConnection, user_id: &str, now: &str) -> Result<i64, LedgerError> {
    let amounts: Vec<i64> = holds::table
        .filter(holds::user_id.eq(user_id))
        .filter(holds::expires_at.gt(now))
        .select(holds::amount)
        .load(conn)?;
    Ok(amounts.into_iter().sum())
}

/// A user's holds still active at `now`
pub fn list_active(conn: &mut SqliteConnection, user_id: &str, now: &str) -> Result<Vec<Hold>, LedgerError> {
    holds::table
        .filter(holds::user_id.eq(user_id))
        .filter(holds::expires_at.gt(now))
        .select(Hold::as_select())
        .order(holds::created_at.asc())
        .load(conn)
        .map_err(LedgerError::from)
}

/// Insert a hold
pub fn insert_hold(conn: &mut SqliteConnection, new_hold: &NewHold<'_>) -> Result<Hold, LedgerError> {
    diesel::insert_into(holds::table)
        .values(new_hold)
        .execute(conn)?;

    get_hold(conn, new_hold.id)?
        .ok_or_else(|| LedgerError::Internal("Failed to retrieve created hold".into()))
}

/// Delete a hold; returns whether it existed
pub fn delete_hold(conn: &mut SqliteConnection, id: &str) -> Result<bool, LedgerError> {
    let deleted = diesel::delete(holds::table.find(id)).execute(conn)?;
    Ok(deleted > 0)
}

/// Delete every hold expired at `now`
pub fn delete_expired(conn: &mut SqliteConnection, now: &str) -> Result<usize, LedgerError> {
    diesel::delete(holds::table.filter(holds::expires_at.le(now)))
        .execute(conn)
        .map_err(LedgerError::from)
}
