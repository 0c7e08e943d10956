//! Activity logging
//!
//! Fire-and-forget sink for `Log(userId, actionType, details, pointsEarned,
//! pointsSpent)`. Two durable backends are provided: a table next to the
//! ledger and a JSON-lines file for offline analytics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, trace};
use uuid::Uuid;

use crate::clock::format_timestamp;
use crate::db::models::NewActivityLog;
use crate::db::{activity_logs, profiles, LedgerDb};
use crate::error::LedgerError;

/// One usage event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub points_earned: i64,
    pub points_spent: i64,
}

impl ActivityEntry {
    /// Create a new activity entry
    pub fn new(user_id: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id: user_id.into(),
            action_type: action_type.into(),
            details: None,
            points_earned: 0,
            points_spent: 0,
        }
    }

    /// Set the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach free-form details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Credits earned by the action
    pub fn with_earned(mut self, points: i64) -> Self {
        self.points_earned = points;
        self
    }

    /// Credits spent by the action
    pub fn with_spent(mut self, points: i64) -> Self {
        self.points_spent = points;
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Sink for activity entries.
///
/// Implementations may fail; callers treat failure as best-effort and log it.
pub trait ActivityLogger: Send + Sync {
    fn log(&self, entry: &ActivityEntry) -> Result<(), LedgerError>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActivityLogger;

impl ActivityLogger for NoopActivityLogger {
    fn log(&self, entry: &ActivityEntry) -> Result<(), LedgerError> {
        trace!(user_id = %entry.user_id, action = %entry.action_type, "Dropping activity entry");
        Ok(())
    }
}

/// Writes entries to the `activity_logs` table and refreshes the user's
/// `last_active_at`.
#[derive(Clone)]
pub struct SqliteActivityLogger {
    db: LedgerDb,
}

impl SqliteActivityLogger {
    pub fn new(db: LedgerDb) -> Self {
        Self { db }
    }
}

impl ActivityLogger for SqliteActivityLogger {
    fn log(&self, entry: &ActivityEntry) -> Result<(), LedgerError> {
        let id = Uuid::new_v4().to_string();
        let created_at = format_timestamp(entry.timestamp);
        let details_json = entry.details.as_ref().map(serde_json::to_string).transpose()?;

        self.db.with_conn(|conn| {
            activity_logs::insert_activity(
                conn,
                &NewActivityLog {
                    id: &id,
                    user_id: &entry.user_id,
                    action_type: &entry.action_type,
                    details_json: details_json.as_deref(),
                    points_earned: entry.points_earned,
                    points_spent: entry.points_spent,
                    created_at: &created_at,
                },
            )?;
            profiles::touch_last_active(conn, &entry.user_id, &created_at)?;
            Ok(())
        })
    }
}

/// Appends entries to a JSON-lines file
pub struct JsonlActivityLogger {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JsonlActivityLogger {
    /// Open (or create) the log file in append mode
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        info!("Activity logging initialized to {}", path.display());
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ActivityLogger for JsonlActivityLogger {
    fn log(&self, entry: &ActivityEntry) -> Result<(), LedgerError> {
        let line = entry.to_jsonl()?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|e| LedgerError::Internal(format!("Lock poisoned: {}", e)))?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    #[test]
    fn test_jsonl_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let logger = JsonlActivityLogger::open(&path).unwrap();

        logger
            .log(&ActivityEntry::new("alice", "run_efa").with_spent(5))
            .unwrap();
        logger
            .log(
                &ActivityEntry::new("alice", "feedback")
                    .with_earned(10)
                    .with_details(serde_json::json!({ "rating": 5 })),
            )
            .unwrap();

        let content = std::fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<ActivityEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].points_spent, 5);
        assert_eq!(lines[1].details, Some(serde_json::json!({ "rating": 5 })));
    }

    #[test]
    fn test_sqlite_logger_touches_profile() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            profiles::insert_profile(conn, "alice", Role::User, "2026-01-01T00:00:00.000Z").map(|_| ())
        })
        .unwrap();

        let logger = SqliteActivityLogger::new(db.clone());
        let at = "2026-02-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        logger
            .log(&ActivityEntry::new("alice", "run_sem").at(at).with_spent(10))
            .unwrap();

        let (rows, profile) = db
            .with_conn(|conn| {
                Ok((
                    activity_logs::recent_for_user(conn, "alice", 10)?,
                    profiles::require_profile(conn, "alice")?,
                ))
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action_type, "run_sem");
        assert_eq!(profile.last_active_at, "2026-02-01T10:00:00.000Z");
        // activity never moves money
        assert_eq!(profile.balance, 0);
    }
}
