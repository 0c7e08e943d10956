//! Roles and the guard for privileged ledger operations

use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::db::profiles;
use crate::error::LedgerError;

/// Roles stored on a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
#[derive(Default)]
pub enum Role {
    /// Regular researcher account
    #[default]
    User = 0,
    /// Operator allowed to adjust balances and change roles
    Admin = 1,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(LedgerError::InvalidInput(format!("Invalid role: {}", other))),
        }
    }
}

/// Require that `caller_id` holds at least `required`.
///
/// Pure predicate over the caller's profile: reads the role column and
/// nothing else. A caller without a profile is treated as unauthenticated.
pub fn require_role(
    conn: &mut SqliteConnection,
    caller_id: &str,
    required: Role,
) -> Result<(), LedgerError> {
    let role = profiles::get_role(conn, caller_id)?;

    match role {
        Some(role) if role >= required => {
            debug!(caller_id, %role, %required, "Role check passed");
            Ok(())
        }
        Some(role) => {
            warn!(target: "security", caller_id, %role, %required, "Privileged operation denied");
            Err(LedgerError::Unauthorized {
                caller_id: caller_id.to_string(),
                required,
            })
        }
        None => {
            warn!(target: "security", caller_id, %required, "Privileged operation denied for unknown caller");
            Err(LedgerError::Unauthorized {
                caller_id: caller_id.to_string(),
                required,
            })
        }
    }
}
