//! Profile balance repository
//!
//! Balance columns are only ever written through [`apply_balance_change`],
//! which carries the optimistic version check. Feature code never touches
//! these rows directly; it goes through the credit service.

use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::debug;

use super::diesel_schema::profiles;
use super::models::{NewProfile, Profile};
use crate::auth::Role;
use crate::error::LedgerError;

/// Get a profile by user id
pub fn get_profile(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Option<Profile>, LedgerError> {
    profiles::table
        .find(user_id)
        .select(Profile::as_select())
        .first(conn)
        .optional()
        .map_err(LedgerError::from)
}

/// Get a profile, failing with `NotFound` when absent
pub fn require_profile(conn: &mut SqliteConnection, user_id: &str) -> Result<Profile, LedgerError> {
    get_profile(conn, user_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("profile {}", user_id)))
}

/// Read only the role column
pub fn get_role(conn: &mut SqliteConnection, user_id: &str) -> Result<Option<Role>, LedgerError> {
    let role: Option<String> = profiles::table
        .find(user_id)
        .select(profiles::role)
        .first(conn)
        .optional()?;

    role.map(|r| r.parse()).transpose()
}

/// Insert an empty profile (zero balance, version 0)
pub fn insert_profile(
    conn: &mut SqliteConnection,
    user_id: &str,
    role: Role,
    now: &str,
) -> Result<Profile, LedgerError> {
    let new_profile = NewProfile {
        id: user_id,
        role: role.as_str(),
        balance: 0,
        total_earned: 0,
        total_spent: 0,
        version: 0,
        created_at: now,
        updated_at: now,
        last_active_at: now,
    };

    diesel::insert_into(profiles::table)
        .values(&new_profile)
        .execute(conn)
        .map_err(|e| match e {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                LedgerError::ProfileExists(user_id.to_string())
            }
            other => LedgerError::from(other),
        })?;

    debug!(user_id, %role, "Inserted profile");
    require_profile(conn, user_id)
}

/// Totals after applying `amount` to `profile`.
///
/// `InsufficientFunds` if the balance would go negative, `InvalidInput` if
/// any total leaves the `i64` range.
pub fn next_totals(profile: &Profile, amount: i64) -> Result<(i64, i64, i64), LedgerError> {
    let overflow = || LedgerError::InvalidInput("amount overflows balance".to_string());
    let balance = profile.balance.checked_add(amount).ok_or_else(overflow)?;
    if balance < 0 {
        return Err(LedgerError::InsufficientFunds {
            balance: profile.balance,
            required: amount.saturating_neg(),
        });
    }
    if amount >= 0 {
        let earned = profile.total_earned.checked_add(amount).ok_or_else(overflow)?;
        Ok((balance, earned, profile.total_spent))
    } else {
        let spent = amount
            .checked_neg()
            .and_then(|debit| profile.total_spent.checked_add(debit))
            .ok_or_else(overflow)?;
        Ok((balance, profile.total_earned, spent))
    }
}

/// Write a balance change computed from `profile`, guarded by its version.
///
/// Returns the updated row. Zero affected rows means somebody else moved the
/// version under us and is reported as `StorageConflict`.
pub fn apply_balance_change(
    conn: &mut SqliteConnection,
    profile: &Profile,
    amount: i64,
    now: &str,
) -> Result<Profile, LedgerError> {
    let (balance, total_earned, total_spent) = next_totals(profile, amount)?;

    let updated = diesel::update(
        profiles::table
            .filter(profiles::id.eq(&profile.id))
            .filter(profiles::version.eq(profile.version)),
    )
    .set((
        profiles::balance.eq(balance),
        profiles::total_earned.eq(total_earned),
        profiles::total_spent.eq(total_spent),
        profiles::version.eq(profile.version + 1),
        profiles::updated_at.eq(now),
        profiles::last_active_at.eq(now),
    ))
    .execute(conn)?;

    if updated == 0 {
        return Err(LedgerError::StorageConflict { attempts: 1 });
    }

    require_profile(conn, &profile.id)
}

/// Change a profile's role
pub fn set_role(
    conn: &mut SqliteConnection,
    user_id: &str,
    role: Role,
    now: &str,
) -> Result<Profile, LedgerError> {
    let updated = diesel::update(profiles::table.find(user_id))
        .set((profiles::role.eq(role.as_str()), profiles::updated_at.eq(now)))
        .execute(conn)?;

    if updated == 0 {
        return Err(LedgerError::NotFound(format!("profile {}", user_id)));
    }

    require_profile(conn, user_id)
}

/// Refresh `last_active_at`; missing profiles are ignored
pub fn touch_last_active(conn: &mut SqliteConnection, user_id: &str, now: &str) -> Result<bool, LedgerError> {
    let updated = diesel::update(profiles::table.find(user_id))
        .set(profiles::last_active_at.eq(now))
        .execute(conn)?;
    Ok(updated > 0)
}

/// List all profile ids (for audits)
pub fn list_profile_ids(conn: &mut SqliteConnection) -> Result<Vec<String>, LedgerError> {
    profiles::table
        .select(profiles::id)
        .order(profiles::id.asc())
        .load(conn)
        .map_err(LedgerError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LedgerDb;

    const NOW: &str = "2026-01-01T00:00:00.000Z";

    #[test]
    fn test_insert_and_duplicate() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let profile = insert_profile(conn, "alice", Role::User, NOW)?;
            assert_eq!(profile.balance, 0);
            assert_eq!(profile.version, 0);
            assert!(matches!(
                insert_profile(conn, "alice", Role::User, NOW),
                Err(LedgerError::ProfileExists(_))
            ));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_next_totals() {
        let profile = Profile {
            id: "a".into(),
            role: "user".into(),
            balance: 70,
            total_earned: 100,
            total_spent: 30,
            version: 2,
            created_at: NOW.into(),
            updated_at: NOW.into(),
            last_active_at: NOW.into(),
        };
        assert_eq!(next_totals(&profile, 50).unwrap(), (120, 150, 30));
        assert_eq!(next_totals(&profile, -70).unwrap(), (0, 100, 100));
        assert!(matches!(
            next_totals(&profile, -80),
            Err(LedgerError::InsufficientFunds { balance: 70, required: 80 })
        ));
    }

    #[test]
    fn test_next_totals_overflow_is_invalid_input() {
        let profile = Profile {
            id: "a".into(),
            role: "user".into(),
            balance: 70,
            total_earned: 100,
            total_spent: 30,
            version: 2,
            created_at: NOW.into(),
            updated_at: NOW.into(),
            last_active_at: NOW.into(),
        };
        assert!(matches!(
            next_totals(&profile, i64::MAX),
            Err(LedgerError::InvalidInput(_))
        ));
        // total_earned overflows even though the balance fits
        let rich = Profile { balance: 0, total_earned: i64::MAX, ..profile };
        assert!(matches!(next_totals(&rich, 1), Err(LedgerError::InvalidInput(_))));
    }

    #[test]
    fn test_stale_version_is_conflict() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let profile = insert_profile(conn, "alice", Role::User, NOW)?;
            let updated = apply_balance_change(conn, &profile, 10, NOW)?;
            assert_eq!(updated.balance, 10);
            assert_eq!(updated.version, 1);

            // `profile` still carries version 0
            assert!(matches!(
                apply_balance_change(conn, &profile, 10, NOW),
                Err(LedgerError::StorageConflict { .. })
            ));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_set_role_missing_profile() {
        let db = LedgerDb::open_in_memory().unwrap();
        let result = db.with_conn(|conn| set_role(conn, "ghost", Role::Admin, NOW));
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }
}
