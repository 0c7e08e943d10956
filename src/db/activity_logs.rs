//! Activity log repository

use diesel::prelude::*;

use super::diesel_schema::activity_logs;
use super::models::{ActivityLog, NewActivityLog};
use crate::error::LedgerError;

/// Insert an activity row
pub fn insert_activity(conn: &mut SqliteConnection, entry: &NewActivityLog<'_>) -> Result<(), LedgerError> {
    diesel::insert_into(activity_logs::table)
        .values(entry)
        .execute(conn)?;
    Ok(())
}

/// Recent activity for a user, newest first
pub fn recent_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
    limit: i64,
) -> Result<Vec<ActivityLog>, LedgerError> {
    activity_logs::table
        .filter(activity_logs::user_id.eq(user_id))
        .select(ActivityLog::as_select())
        .order(activity_logs::created_at.desc())
        .limit(limit)
        .load(conn)
        .map_err(LedgerError::from)
}
