//! Credit service - the single writer path for balances
//!
//! Every balance change funnels through [`CreditService::record_transaction`]
//! or one of the compositions built on the same write unit. A write unit:
//!
//! 1. opens `BEGIN IMMEDIATE` (write lock taken before any read),
//! 2. reads the profile and the user's active holds,
//! 3. rejects debits that would overdraw the available balance,
//! 4. updates the profile under its version and appends the transaction.
//!
//! Either both rows land or neither does. Different users never wait on each
//! other above SQLite's own lock.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{require_role, Role};
use crate::catalog::{CostCatalog, OperationKind};
use crate::clock::{day_start, format_timestamp, Clock, SystemClock};
use crate::config::{Config, RewardAmounts};
use crate::db::models::{NewHold, NewTransaction};
use crate::db::transactions::TypeTotal;
use crate::db::{holds, profiles, transactions, Hold, LedgerDb, Profile, Transaction, TransactionQuery, TransactionType};
use crate::error::LedgerError;
use crate::logging::{ActivityEntry, ActivityLogger, NoopActivityLogger};

use super::events::{EventBus, LedgerEvent};

// ============================================================================
// Types
// ============================================================================

/// Amounts and limits the service applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    pub signup_bonus: i64,
    pub daily_bonus: i64,
    pub rewards: RewardAmounts,
    pub hold_ttl: chrono::Duration,
    pub max_write_attempts: u32,
}

impl LedgerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            signup_bonus: config.signup_bonus,
            daily_bonus: config.daily_bonus,
            rewards: config.rewards.clone(),
            hold_ttl: config.hold_ttl(),
            max_write_attempts: config.max_write_attempts,
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Current balance with lifetime totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSummary {
    pub user_id: String,
    pub balance: i64,
    pub total_earned: i64,
    pub total_spent: i64,
    /// Sum of active holds
    pub held: i64,
    /// `balance - held`
    pub available: i64,
}

/// Input for recording a transaction
#[derive(Debug, Clone, Deserialize)]
pub struct RecordTransactionInput {
    pub user_id: String,
    pub amount: i64,
    pub tx_type: TransactionType,
    pub description: String,
    #[serde(default)]
    pub related_id: Option<String>,
}

/// A transaction that was applied, with the balance it left behind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedTransaction {
    pub balance: i64,
    pub transaction: Transaction,
}

/// Result of paying for an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Charge {
    pub balance: i64,
    pub cost: i64,
    /// `None` for zero-cost operations, which leave no ledger row
    pub transaction: Option<Transaction>,
}

/// Outcome of a daily bonus request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DailyBonusOutcome {
    Granted { amount: i64, balance: i64 },
    AlreadyClaimed,
}

/// Earn events with a configured reward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    Invite,
    Share,
    Feedback,
}

impl RewardKind {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            RewardKind::Invite => TransactionType::InviteReward,
            RewardKind::Share => TransactionType::ShareReward,
            RewardKind::Feedback => TransactionType::FeedbackReward,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RewardKind::Invite => "invite",
            RewardKind::Share => "share",
            RewardKind::Feedback => "feedback",
        }
    }

    fn amount(&self, rewards: &RewardAmounts) -> i64 {
        match self {
            RewardKind::Invite => rewards.invite,
            RewardKind::Share => rewards.share,
            RewardKind::Feedback => rewards.feedback,
        }
    }
}

impl std::str::FromStr for RewardKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invite" => Ok(RewardKind::Invite),
            "share" => Ok(RewardKind::Share),
            "feedback" => Ok(RewardKind::Feedback),
            other => Err(LedgerError::InvalidInput(format!("Invalid reward kind: {}", other))),
        }
    }
}

/// Reconciliation of a profile against its ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerAudit {
    pub user_id: String,
    pub balance: i64,
    pub total_earned: i64,
    pub total_spent: i64,
    pub transaction_count: i64,
    pub transaction_sum: i64,
    pub by_type: Vec<TypeTotal>,
    pub violations: Vec<String>,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Types written only through their own guarded operation
/// (`admin_adjust`, `grant_daily_bonus_if_eligible`, `create_profile`).
const RESTRICTED_TYPES: [TransactionType; 3] = [
    TransactionType::AdminAdjustment,
    TransactionType::DailyBonus,
    TransactionType::SignupBonus,
];

// ============================================================================
// Service
// ============================================================================

/// Credit service for balance checks, debits, credits and grants
pub struct CreditService {
    db: LedgerDb,
    catalog: Arc<CostCatalog>,
    settings: LedgerSettings,
    clock: Arc<dyn Clock>,
    activity: Arc<dyn ActivityLogger>,
    events: Arc<EventBus>,
}

impl CreditService {
    /// Create a new credit service (system clock, no activity sink)
    pub fn new(
        db: LedgerDb,
        catalog: Arc<CostCatalog>,
        settings: LedgerSettings,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            db,
            catalog,
            settings,
            clock: Arc::new(SystemClock),
            activity: Arc::new(NoopActivityLogger),
            events,
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the activity sink
    pub fn with_activity_logger(mut self, activity: Arc<dyn ActivityLogger>) -> Self {
        self.activity = activity;
        self
    }

    pub fn catalog(&self) -> &CostCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    fn now(&self) -> String {
        format_timestamp(self.clock.now())
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Current balance and lifetime totals
    pub fn get_balance(&self, user_id: &str) -> Result<BalanceSummary, LedgerError> {
        let now = self.now();
        self.db.with_conn(|conn| {
            let profile = profiles::require_profile(conn, user_id)?;
            let held = holds::active_total(conn, user_id, &now)?;
            Ok(BalanceSummary {
                user_id: profile.id,
                balance: profile.balance,
                total_earned: profile.total_earned,
                total_spent: profile.total_spent,
                held,
                available: profile.balance - held,
            })
        })
    }

    /// Advisory pre-flight check: true iff the available balance covers `cost`.
    ///
    /// Reserves nothing. Use [`CreditService::reserve`] when the paid-for
    /// work is expensive and must not race other spends.
    pub fn check_balance(&self, user_id: &str, cost: i64) -> Result<bool, LedgerError> {
        Ok(self.get_balance(user_id)?.available >= cost)
    }

    /// Audit history, newest first
    pub fn list_transactions(
        &self,
        user_id: &str,
        query: &TransactionQuery,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.db.with_conn(|conn| {
            profiles::require_profile(conn, user_id)?;
            transactions::list_transactions(conn, user_id, query)
        })
    }

    /// A user's holds that have not expired
    pub fn active_holds(&self, user_id: &str) -> Result<Vec<Hold>, LedgerError> {
        let now = self.now();
        self.db.with_conn(|conn| holds::list_active(conn, user_id, &now))
    }

    // =========================================================================
    // Core Write Path
    // =========================================================================

    /// Apply one signed amount to a user's balance and append the ledger row.
    ///
    /// Must run inside an immediate transaction.
    fn apply(
        conn: &mut diesel::SqliteConnection,
        input: &RecordTransactionInput,
        now: &str,
    ) -> Result<RecordedTransaction, LedgerError> {
        let profile = profiles::require_profile(conn, &input.user_id)?;

        if input.amount < 0 {
            let held = holds::active_total(conn, &input.user_id, now)?;
            let available = profile.balance.saturating_sub(held);
            if available.checked_add(input.amount).map_or(true, |left| left < 0) {
                debug!(
                    user_id = %input.user_id,
                    available,
                    amount = input.amount,
                    "Debit rejected"
                );
                return Err(LedgerError::InsufficientFunds {
                    balance: available,
                    required: input.amount.saturating_neg(),
                });
            }
        }

        // created_at never goes backwards within one user's ledger
        let created_at = if now < profile.updated_at.as_str() {
            profile.updated_at.clone()
        } else {
            now.to_string()
        };

        let updated = profiles::apply_balance_change(conn, &profile, input.amount, &created_at)?;

        let id = Uuid::new_v4().to_string();
        let transaction = transactions::insert_transaction(
            conn,
            &NewTransaction {
                id: &id,
                user_id: &input.user_id,
                sequence: updated.version,
                amount: input.amount,
                tx_type: input.tx_type.as_str(),
                description: &input.description,
                related_id: input.related_id.as_deref(),
                balance_after: updated.balance,
                created_at: &created_at,
            },
        )?;

        Ok(RecordedTransaction {
            balance: updated.balance,
            transaction,
        })
    }

    fn validate_input(input: &RecordTransactionInput) -> Result<(), LedgerError> {
        if input.user_id.trim().is_empty() {
            return Err(LedgerError::InvalidInput("user_id is required".into()));
        }
        if input.amount == 0 {
            return Err(LedgerError::InvalidInput("amount must be non-zero".into()));
        }
        if input.tx_type.is_spend() && input.amount > 0 {
            return Err(LedgerError::InvalidInput(format!(
                "{} must carry a negative amount",
                input.tx_type
            )));
        }
        if input.tx_type.is_earn() && input.amount < 0 {
            return Err(LedgerError::InvalidInput(format!(
                "{} must carry a positive amount",
                input.tx_type
            )));
        }
        if input.description.trim().is_empty() {
            return Err(LedgerError::InvalidInput("description is required".into()));
        }
        Ok(())
    }

    fn emit_recorded(&self, recorded: &RecordedTransaction) {
        let tx = &recorded.transaction;
        self.events.emit(LedgerEvent::TransactionRecorded {
            user_id: tx.user_id.clone(),
            transaction_id: tx.id.clone(),
            tx_type: tx.tx_type.clone(),
            amount: tx.amount,
            balance_after: tx.balance_after,
        });
    }

    fn emit_denied(&self, err: &LedgerError, operation: &str) {
        if let LedgerError::Unauthorized { caller_id, .. } = err {
            self.events.emit(LedgerEvent::AccessDenied {
                caller_id: caller_id.clone(),
                operation: operation.to_string(),
            });
        }
    }

    /// Best-effort activity write; failures are logged, never returned
    pub fn log_activity(&self, entry: ActivityEntry) {
        if let Err(e) = self.activity.log(&entry) {
            warn!(
                user_id = %entry.user_id,
                action = %entry.action_type,
                error = %e,
                "Activity log write failed"
            );
        }
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Record a signed balance change.
    ///
    /// Debits that would take the available balance below zero fail with
    /// `InsufficientFunds` and change nothing. Admin adjustments, daily
    /// bonuses and signup grants are refused here; they have their own
    /// guarded operations.
    pub fn record_transaction(
        &self,
        input: RecordTransactionInput,
    ) -> Result<RecordedTransaction, LedgerError> {
        if RESTRICTED_TYPES.contains(&input.tx_type) {
            return Err(LedgerError::InvalidInput(format!(
                "{} cannot be recorded directly",
                input.tx_type
            )));
        }
        Self::validate_input(&input)?;
        let now = self.now();

        let recorded = self
            .db
            .write_atomic(self.settings.max_write_attempts, |conn| Self::apply(conn, &input, &now))?;

        debug!(
            user_id = %input.user_id,
            tx_type = %input.tx_type,
            amount = input.amount,
            balance = recorded.balance,
            "Transaction recorded"
        );
        self.emit_recorded(&recorded);
        Ok(recorded)
    }

    /// Debit the catalog cost of `kind` after the paid-for work succeeded
    pub fn deduct_for_operation(
        &self,
        user_id: &str,
        kind: OperationKind,
        related_id: Option<&str>,
    ) -> Result<Charge, LedgerError> {
        let cost = self.catalog.cost(kind);

        let charge = if cost == 0 {
            let summary = self.get_balance(user_id)?;
            Charge {
                balance: summary.balance,
                cost,
                transaction: None,
            }
        } else {
            let recorded = self.record_transaction(RecordTransactionInput {
                user_id: user_id.to_string(),
                amount: -cost,
                tx_type: kind.transaction_type(),
                description: format!("Charge for {}", kind),
                related_id: related_id.map(str::to_string),
            })?;
            Charge {
                balance: recorded.balance,
                cost,
                transaction: Some(recorded.transaction),
            }
        };

        self.log_spend(user_id, kind, &charge, related_id);
        Ok(charge)
    }

    fn log_spend(&self, user_id: &str, kind: OperationKind, charge: &Charge, related_id: Option<&str>) {
        self.log_activity(
            ActivityEntry::new(user_id, kind.as_str())
                .at(self.clock.now())
                .with_spent(charge.cost)
                .with_details(serde_json::json!({
                    "transaction_id": charge.transaction.as_ref().map(|t| t.id.clone()),
                    "related_id": related_id,
                })),
        );
    }

    /// Credit a configured reward
    pub fn grant_reward(
        &self,
        user_id: &str,
        kind: RewardKind,
        related_id: Option<&str>,
    ) -> Result<RecordedTransaction, LedgerError> {
        let amount = kind.amount(&self.settings.rewards);
        let tx_type = kind.transaction_type();

        let recorded = self.record_transaction(RecordTransactionInput {
            user_id: user_id.to_string(),
            amount,
            tx_type,
            description: format!("Reward: {}", tx_type),
            related_id: related_id.map(str::to_string),
        })?;

        self.log_activity(
            ActivityEntry::new(user_id, tx_type.as_str())
                .at(self.clock.now())
                .with_earned(amount),
        );
        Ok(recorded)
    }

    /// Privileged signed adjustment.
    ///
    /// The caller's role is checked before anything else, so a non-admin
    /// gets `Unauthorized` whatever the amount or target. The balance
    /// invariant still applies to admins.
    pub fn admin_adjust(
        &self,
        caller_id: &str,
        target_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<RecordedTransaction, LedgerError> {
        let input = RecordTransactionInput {
            user_id: target_id.to_string(),
            amount,
            tx_type: TransactionType::AdminAdjustment,
            description: reason.trim().to_string(),
            related_id: Some(format!("admin:{}", caller_id)),
        };
        let now = self.now();

        let result = self.db.write_atomic(self.settings.max_write_attempts, |conn| {
            require_role(conn, caller_id, Role::Admin)?;
            Self::validate_input(&input)?;
            Self::apply(conn, &input, &now)
        });

        let recorded = result.map_err(|e| {
            self.emit_denied(&e, "admin_adjust");
            e
        })?;

        info!(
            caller = caller_id,
            target = target_id,
            amount,
            balance = recorded.balance,
            reason = %input.description,
            "Admin adjustment applied"
        );
        self.emit_recorded(&recorded);
        self.events.emit(LedgerEvent::AdminAdjusted {
            caller_id: caller_id.to_string(),
            target_id: target_id.to_string(),
            amount,
            balance_after: recorded.balance,
        });
        Ok(recorded)
    }

    /// Grant the daily bonus unless one was already granted this UTC day.
    ///
    /// The eligibility read and the grant share one immediate transaction;
    /// a partial unique index on the ledger backs it up.
    pub fn grant_daily_bonus_if_eligible(&self, user_id: &str) -> Result<DailyBonusOutcome, LedgerError> {
        let now_at = self.clock.now();
        let now = format_timestamp(now_at);
        let since = format_timestamp(day_start(now_at));
        let input = RecordTransactionInput {
            user_id: user_id.to_string(),
            amount: self.settings.daily_bonus,
            tx_type: TransactionType::DailyBonus,
            description: "Daily bonus".to_string(),
            related_id: Some(now_at.format("%Y-%m-%d").to_string()),
        };
        Self::validate_input(&input)?;

        let result = self.db.write_atomic(self.settings.max_write_attempts, |conn| {
            profiles::require_profile(conn, user_id)?;
            if transactions::count_since(conn, user_id, TransactionType::DailyBonus, &since)? > 0 {
                return Ok(None);
            }
            Self::apply(conn, &input, &now).map(Some)
        });

        match result {
            Ok(Some(recorded)) => {
                debug!(user_id, amount = input.amount, "Daily bonus granted");
                self.emit_recorded(&recorded);
                self.events.emit(LedgerEvent::DailyBonusGranted {
                    user_id: user_id.to_string(),
                    amount: input.amount,
                });
                self.log_activity(
                    ActivityEntry::new(user_id, TransactionType::DailyBonus.as_str())
                        .at(now_at)
                        .with_earned(input.amount),
                );
                Ok(DailyBonusOutcome::Granted {
                    amount: input.amount,
                    balance: recorded.balance,
                })
            }
            Ok(None) | Err(LedgerError::DuplicateEntry(_)) => {
                debug!(user_id, "Daily bonus already claimed");
                Ok(DailyBonusOutcome::AlreadyClaimed)
            }
            Err(e) => Err(e),
        }
    }

    /// Provision a profile and its signup grant as one unit
    pub fn create_profile(&self, user_id: &str, role: Role) -> Result<Profile, LedgerError> {
        if user_id.trim().is_empty() {
            return Err(LedgerError::InvalidInput("user_id is required".into()));
        }
        let now = self.now();
        let signup = RecordTransactionInput {
            user_id: user_id.to_string(),
            amount: self.settings.signup_bonus,
            tx_type: TransactionType::SignupBonus,
            description: "Signup bonus".to_string(),
            related_id: None,
        };

        let (profile, recorded) = self.db.write_atomic(self.settings.max_write_attempts, |conn| {
            profiles::insert_profile(conn, user_id, role, &now)?;
            let recorded = if signup.amount > 0 {
                Some(Self::apply(conn, &signup, &now)?)
            } else {
                None
            };
            Ok((profiles::require_profile(conn, user_id)?, recorded))
        })?;

        info!(user_id, %role, balance = profile.balance, "Profile created");
        self.events.emit(LedgerEvent::ProfileCreated {
            user_id: user_id.to_string(),
            role,
            balance: profile.balance,
        });
        if let Some(ref recorded) = recorded {
            self.emit_recorded(recorded);
        }
        Ok(profile)
    }

    /// Privileged role change; records no transaction
    pub fn set_role(&self, caller_id: &str, target_id: &str, role: Role) -> Result<Profile, LedgerError> {
        let now = self.now();
        let result = self.db.write_atomic(self.settings.max_write_attempts, |conn| {
            require_role(conn, caller_id, Role::Admin)?;
            profiles::set_role(conn, target_id, role, &now)
        });

        let profile = result.map_err(|e| {
            self.emit_denied(&e, "set_role");
            e
        })?;

        info!(caller = caller_id, target = target_id, %role, "Role changed");
        self.events.emit(LedgerEvent::RoleChanged {
            caller_id: caller_id.to_string(),
            target_id: target_id.to_string(),
            role,
        });
        Ok(profile)
    }

    // =========================================================================
    // Holds
    // =========================================================================

    /// Reserve the cost of `kind` before doing the work.
    ///
    /// Settle with [`CreditService::commit_hold`] on success or
    /// [`CreditService::release_hold`] on failure. An abandoned hold stops
    /// counting once it expires.
    pub fn reserve(
        &self,
        user_id: &str,
        kind: OperationKind,
        related_id: Option<&str>,
    ) -> Result<Hold, LedgerError> {
        let cost = self.catalog.cost(kind);
        let now_at = self.clock.now();
        let now = format_timestamp(now_at);
        let expires_at = format_timestamp(now_at + self.settings.hold_ttl);
        let id = Uuid::new_v4().to_string();

        let hold = self.db.write_atomic(self.settings.max_write_attempts, |conn| {
            let profile = profiles::require_profile(conn, user_id)?;
            let held = holds::active_total(conn, user_id, &now)?;
            let available = profile.balance - held;
            if available < cost {
                return Err(LedgerError::InsufficientFunds {
                    balance: available,
                    required: cost,
                });
            }

            holds::insert_hold(
                conn,
                &NewHold {
                    id: &id,
                    user_id,
                    amount: cost,
                    operation_kind: kind.as_str(),
                    related_id,
                    created_at: &now,
                    expires_at: &expires_at,
                },
            )
        })?;

        debug!(user_id, hold_id = %hold.id, cost, "Hold placed");
        self.events.emit(LedgerEvent::HoldPlaced {
            hold_id: hold.id.clone(),
            user_id: user_id.to_string(),
            amount: cost,
        });
        Ok(hold)
    }

    /// Turn a hold into a debit. The hold and the debit settle together.
    ///
    /// An expired hold is deleted without charging and reported as
    /// `NotFound`; its reservation no longer backs the debit.
    pub fn commit_hold(&self, hold_id: &str) -> Result<Charge, LedgerError> {
        let now = self.now();

        let (hold, charge) = self.db.write_atomic(self.settings.max_write_attempts, |conn| {
            let hold = holds::get_hold(conn, hold_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("hold {}", hold_id)))?;
            let kind: OperationKind = hold.operation_kind.parse()?;
            holds::delete_hold(conn, hold_id)?;

            // Ok so the delete commits
            if hold.expires_at.as_str() <= now.as_str() {
                return Ok((hold, None));
            }

            let charge = if hold.amount == 0 {
                let profile = profiles::require_profile(conn, &hold.user_id)?;
                Charge {
                    balance: profile.balance,
                    cost: 0,
                    transaction: None,
                }
            } else {
                let input = RecordTransactionInput {
                    user_id: hold.user_id.clone(),
                    amount: -hold.amount,
                    tx_type: kind.transaction_type(),
                    description: format!("Charge for {}", kind),
                    related_id: hold.related_id.clone(),
                };
                let recorded = Self::apply(conn, &input, &now)?;
                Charge {
                    balance: recorded.balance,
                    cost: hold.amount,
                    transaction: Some(recorded.transaction),
                }
            };
            Ok((hold, Some(charge)))
        })?;

        let Some(charge) = charge else {
            warn!(
                hold_id,
                user_id = %hold.user_id,
                expires_at = %hold.expires_at,
                "Commit of expired hold refused"
            );
            self.events.emit(LedgerEvent::HoldReleased {
                hold_id: hold.id,
                user_id: hold.user_id,
            });
            return Err(LedgerError::NotFound(format!("hold {} expired", hold_id)));
        };

        self.events.emit(LedgerEvent::HoldCommitted {
            hold_id: hold.id.clone(),
            user_id: hold.user_id.clone(),
        });
        if let Some(ref transaction) = charge.transaction {
            self.emit_recorded(&RecordedTransaction {
                balance: charge.balance,
                transaction: transaction.clone(),
            });
        }
        if let Ok(kind) = hold.operation_kind.parse::<OperationKind>() {
            self.log_spend(&hold.user_id, kind, &charge, hold.related_id.as_deref());
        }
        Ok(charge)
    }

    /// Drop a hold without charging; returns whether it existed
    pub fn release_hold(&self, hold_id: &str) -> Result<bool, LedgerError> {
        let released = self.db.write_atomic(self.settings.max_write_attempts, |conn| {
            let hold = holds::get_hold(conn, hold_id)?;
            if hold.is_some() {
                holds::delete_hold(conn, hold_id)?;
            }
            Ok(hold)
        })?;

        match released {
            Some(hold) => {
                debug!(hold_id, user_id = %hold.user_id, "Hold released");
                self.events.emit(LedgerEvent::HoldReleased {
                    hold_id: hold.id,
                    user_id: hold.user_id,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete expired holds
    pub fn purge_expired_holds(&self) -> Result<usize, LedgerError> {
        let now = self.now();
        let purged = self
            .db
            .write_atomic(self.settings.max_write_attempts, |conn| holds::delete_expired(conn, &now))?;
        if purged > 0 {
            info!(purged, "Purged expired holds");
        }
        Ok(purged)
    }

    // =========================================================================
    // Audit
    // =========================================================================

    /// Re-derive the balance from the ledger and report every mismatch
    pub fn verify_ledger(&self, user_id: &str) -> Result<LedgerAudit, LedgerError> {
        let (profile, ledger, by_type) = self.db.with_conn(|conn| {
            let profile = profiles::require_profile(conn, user_id)?;
            let ledger = transactions::ledger_for_user(conn, user_id)?;
            let by_type = transactions::totals_by_type(conn, user_id)?;
            Ok((profile, ledger, by_type))
        })?;

        let mut violations = Vec::new();
        let mut running = 0i64;
        let mut previous_created_at: Option<&str> = None;

        for (index, tx) in ledger.iter().enumerate() {
            let expected_sequence = index as i64 + 1;
            if tx.sequence != expected_sequence {
                violations.push(format!(
                    "transaction {} has sequence {}, expected {}",
                    tx.id, tx.sequence, expected_sequence
                ));
            }
            running += tx.amount;
            if tx.balance_after != running {
                violations.push(format!(
                    "transaction {} has balance_after {}, expected {}",
                    tx.id, tx.balance_after, running
                ));
            }
            if tx.balance_after < 0 {
                violations.push(format!("transaction {} leaves a negative balance", tx.id));
            }
            if let Some(prev) = previous_created_at {
                if tx.created_at.as_str() < prev {
                    violations.push(format!("transaction {} is older than its predecessor", tx.id));
                }
            }
            if let Err(e) = tx.transaction_type() {
                violations.push(format!("transaction {}: {}", tx.id, e));
            }
            previous_created_at = Some(tx.created_at.as_str());
        }

        if running != profile.balance {
            violations.push(format!(
                "balance {} does not match ledger sum {}",
                profile.balance, running
            ));
        }
        if profile.total_earned - profile.total_spent != profile.balance {
            violations.push(format!(
                "total_earned {} - total_spent {} does not equal balance {}",
                profile.total_earned, profile.total_spent, profile.balance
            ));
        }
        let earned: i64 = by_type.iter().map(|t| t.amount).filter(|a| *a > 0).sum();
        if earned > profile.total_earned {
            violations.push(format!(
                "earn types sum to {}, more than total_earned {}",
                earned, profile.total_earned
            ));
        }
        if profile.version != ledger.len() as i64 {
            violations.push(format!(
                "profile version {} does not match {} ledger rows",
                profile.version,
                ledger.len()
            ));
        }

        if !violations.is_empty() {
            warn!(user_id, count = violations.len(), "Ledger audit found violations");
        }

        Ok(LedgerAudit {
            user_id: profile.id,
            balance: profile.balance,
            total_earned: profile.total_earned,
            total_spent: profile.total_spent,
            transaction_count: ledger.len() as i64,
            transaction_sum: running,
            by_type,
            violations,
        })
    }

    /// Audit every profile; returns only the inconsistent ones
    pub fn verify_all(&self) -> Result<Vec<LedgerAudit>, LedgerError> {
        let user_ids = self.db.with_conn(profiles::list_profile_ids)?;
        let mut failures = Vec::new();
        for user_id in &user_ids {
            let audit = self.verify_ledger(user_id)?;
            if !audit.is_consistent() {
                failures.push(audit);
            }
        }
        info!(checked = user_ids.len(), inconsistent = failures.len(), "Ledger audit complete");
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;

    fn service() -> (CreditService, Arc<FixedClock>) {
        let db = LedgerDb::open_in_memory().unwrap();
        let clock = Arc::new(FixedClock::new(chrono::Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()));
        let service = CreditService::new(
            db,
            Arc::new(CostCatalog::default()),
            LedgerSettings::default(),
            Arc::new(EventBus::new()),
        )
        .with_clock(clock.clone());
        (service, clock)
    }

    #[test]
    fn test_create_profile_grants_signup_bonus() {
        let (service, _) = service();
        let profile = service.create_profile("alice", Role::User).unwrap();
        assert_eq!(profile.balance, 100);
        assert_eq!(profile.total_earned, 100);
        assert_eq!(profile.version, 1);

        let history = service.list_transactions("alice", &TransactionQuery::default()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tx_type, "signup_bonus");
        assert_eq!(history[0].balance_after, 100);

        assert!(matches!(
            service.create_profile("alice", Role::User),
            Err(LedgerError::ProfileExists(_))
        ));
    }

    #[test]
    fn test_missing_profile_is_not_found() {
        let (service, _) = service();
        assert!(matches!(service.get_balance("ghost"), Err(LedgerError::NotFound(_))));
        assert!(matches!(
            service.deduct_for_operation("ghost", OperationKind::Efa, None),
            Err(LedgerError::NotFound(_))
        ));
        // never silently created
        assert!(matches!(service.get_balance("ghost"), Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_input_validation() {
        let (service, _) = service();
        service.create_profile("alice", Role::User).unwrap();

        let zero = service.record_transaction(RecordTransactionInput {
            user_id: "alice".into(),
            amount: 0,
            tx_type: TransactionType::FeedbackReward,
            description: "nothing".into(),
            related_id: None,
        });
        assert!(matches!(zero, Err(LedgerError::InvalidInput(_))));

        let positive_spend = service.record_transaction(RecordTransactionInput {
            user_id: "alice".into(),
            amount: 5,
            tx_type: TransactionType::AnalysisSpend,
            description: "free money".into(),
            related_id: None,
        });
        assert!(matches!(positive_spend, Err(LedgerError::InvalidInput(_))));
        assert_eq!(service.get_balance("alice").unwrap().balance, 100);
    }

    #[test]
    fn test_guarded_types_cannot_be_recorded_directly() {
        let (service, _) = service();
        service.create_profile("alice", Role::User).unwrap();

        for tx_type in [
            TransactionType::AdminAdjustment,
            TransactionType::DailyBonus,
            TransactionType::SignupBonus,
        ] {
            let result = service.record_transaction(RecordTransactionInput {
                user_id: "alice".into(),
                amount: 1_000,
                tx_type,
                description: "self grant".into(),
                related_id: None,
            });
            assert!(matches!(result, Err(LedgerError::InvalidInput(_))), "{}", tx_type);
        }

        let summary = service.get_balance("alice").unwrap();
        assert_eq!(summary.balance, 100);
        assert_eq!(
            service.list_transactions("alice", &TransactionQuery::default()).unwrap().len(),
            1
        );
        // the real daily bonus is still unclaimed
        assert!(matches!(
            service.grant_daily_bonus_if_eligible("alice").unwrap(),
            DailyBonusOutcome::Granted { amount: 5, balance: 105 }
        ));
    }

    #[test]
    fn test_holds_reduce_available_balance() {
        let (service, clock) = service();
        service.create_profile("alice", Role::User).unwrap();

        // sem costs 10 by default
        let hold = service.reserve("alice", OperationKind::Sem, Some("run-1")).unwrap();
        let summary = service.get_balance("alice").unwrap();
        assert_eq!(summary.balance, 100);
        assert_eq!(summary.held, 10);
        assert_eq!(summary.available, 90);
        assert!(!service.check_balance("alice", 95).unwrap());

        let charge = service.commit_hold(&hold.id).unwrap();
        assert_eq!(charge.balance, 90);
        assert_eq!(charge.transaction.unwrap().tx_type, "sem_cfa_spend");
        assert!(matches!(service.commit_hold(&hold.id), Err(LedgerError::NotFound(_))));

        let abandoned = service.reserve("alice", OperationKind::Efa, None).unwrap();
        assert_eq!(service.get_balance("alice").unwrap().available, 85);
        clock.advance(chrono::Duration::seconds(901));
        assert_eq!(service.get_balance("alice").unwrap().available, 90);
        assert_eq!(service.purge_expired_holds().unwrap(), 1);
        assert!(!service.release_hold(&abandoned.id).unwrap());

        assert!(service.verify_ledger("alice").unwrap().is_consistent());
    }

    #[test]
    fn test_expired_hold_cannot_be_committed() {
        let (service, clock) = service();
        service.create_profile("alice", Role::User).unwrap();
        let mut events = service.events.subscribe();

        let hold = service.reserve("alice", OperationKind::Sem, Some("run-9")).unwrap();
        clock.advance(chrono::Duration::seconds(901));

        match service.commit_hold(&hold.id) {
            Err(LedgerError::NotFound(msg)) => assert!(msg.contains("expired"), "{}", msg),
            other => panic!("expected NotFound, got {:?}", other),
        }

        let summary = service.get_balance("alice").unwrap();
        assert_eq!(summary.balance, 100);
        assert_eq!(summary.held, 0);
        assert_eq!(
            service.list_transactions("alice", &TransactionQuery::default()).unwrap().len(),
            1
        );
        // the row went away with the refusal
        assert_eq!(service.purge_expired_holds().unwrap(), 0);
        assert!(matches!(service.commit_hold(&hold.id), Err(LedgerError::NotFound(_))));

        let mut released = false;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, LedgerEvent::HoldCommitted { .. }));
            if matches!(event, LedgerEvent::HoldReleased { .. }) {
                released = true;
            }
        }
        assert!(released);
        assert!(service.verify_ledger("alice").unwrap().is_consistent());
    }

    #[test]
    fn test_released_hold_charges_nothing() {
        let (service, _) = service();
        service.create_profile("alice", Role::User).unwrap();

        let hold = service.reserve("alice", OperationKind::Regression, None).unwrap();
        assert!(service.release_hold(&hold.id).unwrap());
        let summary = service.get_balance("alice").unwrap();
        assert_eq!(summary.balance, 100);
        assert_eq!(summary.available, 100);
        assert_eq!(
            service.list_transactions("alice", &TransactionQuery::default()).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_rewards_use_configured_amounts() {
        let (service, _) = service();
        service.create_profile("alice", Role::User).unwrap();

        let recorded = service.grant_reward("alice", RewardKind::Invite, Some("bob")).unwrap();
        assert_eq!(recorded.balance, 150);
        assert_eq!(recorded.transaction.tx_type, "invite_reward");
        assert_eq!(recorded.transaction.related_id.as_deref(), Some("bob"));

        let audit = service.verify_ledger("alice").unwrap();
        assert_eq!(audit.transaction_sum, 150);
        assert_eq!(audit.total_earned, 150);
    }

    #[test]
    fn test_daily_bonus_rolls_over_at_utc_midnight() {
        let (service, clock) = service();
        service.create_profile("alice", Role::User).unwrap();

        assert!(matches!(
            service.grant_daily_bonus_if_eligible("alice").unwrap(),
            DailyBonusOutcome::Granted { amount: 5, balance: 105 }
        ));
        clock.set(chrono::Utc.with_ymd_and_hms(2026, 5, 1, 23, 59, 59).unwrap());
        assert_eq!(
            service.grant_daily_bonus_if_eligible("alice").unwrap(),
            DailyBonusOutcome::AlreadyClaimed
        );
        clock.set(chrono::Utc.with_ymd_and_hms(2026, 5, 2, 0, 0, 0).unwrap());
        assert_eq!(
            service.grant_daily_bonus_if_eligible("alice").unwrap(),
            DailyBonusOutcome::Granted { amount: 5, balance: 110 }
        );
    }

    #[test]
    fn test_set_role_requires_admin() {
        let (service, _) = service();
        service.create_profile("root", Role::Admin).unwrap();
        service.create_profile("alice", Role::User).unwrap();

        assert!(matches!(
            service.set_role("alice", "alice", Role::Admin),
            Err(LedgerError::Unauthorized { .. })
        ));
        let promoted = service.set_role("root", "alice", Role::Admin).unwrap();
        assert_eq!(promoted.role, "admin");
        // role changes leave the ledger alone
        assert_eq!(promoted.version, 1);
    }
}
