//! Diesel model definitions for ledger tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! TypeScript types are auto-generated via ts-rs. Run:
//!   cargo test export_bindings
//! Generated files go to: bindings/

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use super::diesel_schema::*;
use crate::error::LedgerError;

// ============================================================================
// Transaction Types
// ============================================================================

/// Closed set of ledger transaction kinds.
///
/// Mirrored by the CHECK constraint on `transactions.tx_type`; adding a
/// variant requires a schema version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum TransactionType {
    SignupBonus,
    InviteReward,
    ShareReward,
    FeedbackReward,
    DailyBonus,
    AnalysisSpend,
    SemCfaSpend,
    ExportSpend,
    AiInterpretationSpend,
    AdminAdjustment,
}

impl TransactionType {
    pub const ALL: [TransactionType; 10] = [
        TransactionType::SignupBonus,
        TransactionType::InviteReward,
        TransactionType::ShareReward,
        TransactionType::FeedbackReward,
        TransactionType::DailyBonus,
        TransactionType::AnalysisSpend,
        TransactionType::SemCfaSpend,
        TransactionType::ExportSpend,
        TransactionType::AiInterpretationSpend,
        TransactionType::AdminAdjustment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::SignupBonus => "signup_bonus",
            TransactionType::InviteReward => "invite_reward",
            TransactionType::ShareReward => "share_reward",
            TransactionType::FeedbackReward => "feedback_reward",
            TransactionType::DailyBonus => "daily_bonus",
            TransactionType::AnalysisSpend => "analysis_spend",
            TransactionType::SemCfaSpend => "sem_cfa_spend",
            TransactionType::ExportSpend => "export_spend",
            TransactionType::AiInterpretationSpend => "ai_interpretation_spend",
            TransactionType::AdminAdjustment => "admin_adjustment",
        }
    }

    /// Spend types may only carry negative amounts
    pub fn is_spend(&self) -> bool {
        matches!(
            self,
            TransactionType::AnalysisSpend
                | TransactionType::SemCfaSpend
                | TransactionType::ExportSpend
                | TransactionType::AiInterpretationSpend
        )
    }

    /// Earn types may only carry positive amounts
    pub fn is_earn(&self) -> bool {
        matches!(
            self,
            TransactionType::SignupBonus
                | TransactionType::InviteReward
                | TransactionType::ShareReward
                | TransactionType::FeedbackReward
                | TransactionType::DailyBonus
        )
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| LedgerError::InvalidInput(format!("Invalid transaction type: {}", s)))
    }
}

// ============================================================================
// Profile Models
// ============================================================================

/// Profile balance row
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Identifiable, Serialize, Deserialize, TS)]
#[diesel(table_name = profiles)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[ts(export)]
pub struct Profile {
    pub id: String,
    pub role: String,
    #[ts(type = "number")]
    pub balance: i64,
    #[ts(type = "number")]
    pub total_earned: i64,
    #[ts(type = "number")]
    pub total_spent: i64,
    #[ts(type = "number")]
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
    pub last_active_at: String,
}

/// New profile for INSERT (starts empty; the signup grant is a transaction)
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = profiles)]
pub struct NewProfile<'a> {
    pub id: &'a str,
    pub role: &'a str,
    pub balance: i64,
    pub total_earned: i64,
    pub total_spent: i64,
    pub version: i64,
    pub created_at: &'a str,
    pub updated_at: &'a str,
    pub last_active_at: &'a str,
}

// ============================================================================
// Transaction Models
// ============================================================================

/// Ledger transaction row (immutable once written)
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize, TS)]
#[diesel(table_name = transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[ts(export)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    #[ts(type = "number")]
    pub sequence: i64,
    #[ts(type = "number")]
    pub amount: i64,
    pub tx_type: String,
    pub description: String,
    pub related_id: Option<String>,
    #[ts(type = "number")]
    pub balance_after: i64,
    pub created_at: String,
}

impl Transaction {
    pub fn transaction_type(&self) -> Result<TransactionType, LedgerError> {
        self.tx_type.parse()
    }
}

/// New transaction for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = transactions)]
pub struct NewTransaction<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub sequence: i64,
    pub amount: i64,
    pub tx_type: &'a str,
    pub description: &'a str,
    pub related_id: Option<&'a str>,
    pub balance_after: i64,
    pub created_at: &'a str,
}

// ============================================================================
// Hold Models
// ============================================================================

/// Reservation against a user's available balance
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize, TS)]
#[diesel(table_name = holds)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[ts(export)]
pub struct Hold {
    pub id: String,
    pub user_id: String,
    #[ts(type = "number")]
    pub amount: i64,
    pub operation_kind: String,
    pub related_id: Option<String>,
    pub created_at: String,
    pub expires_at: String,
}

/// New hold for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = holds)]
pub struct NewHold<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub amount: i64,
    pub operation_kind: &'a str,
    pub related_id: Option<&'a str>,
    pub created_at: &'a str,
    pub expires_at: &'a str,
}

// ============================================================================
// Activity Log Models
// ============================================================================

/// Activity log row
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize, TS)]
#[diesel(table_name = activity_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[ts(export)]
pub struct ActivityLog {
    pub id: String,
    pub user_id: String,
    pub action_type: String,
    pub details_json: Option<String>,
    #[ts(type = "number")]
    pub points_earned: i64,
    #[ts(type = "number")]
    pub points_spent: i64,
    pub created_at: String,
}

/// New activity log row for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = activity_logs)]
pub struct NewActivityLog<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub action_type: &'a str,
    pub details_json: Option<&'a str>,
    pub points_earned: i64,
    pub points_spent: i64,
    pub created_at: &'a str,
}
