//! Credit Ledger - prepaid credits for the statistics platform
//!
//! Researchers receive credits (signup grant, daily bonus, rewards) and spend
//! them on paid analyses and exports. Every balance change lands in an
//! append-only ledger in the same atomic unit as the balance update.
//!
//! ## Guarantees
//!
//! | Property | Enforced by |
//! |----------|-------------|
//! | Balance never negative | service check + `CHECK (balance >= 0)` |
//! | `balance = Σ ledger amounts` | single write path, one transaction per change |
//! | No lost updates | `BEGIN IMMEDIATE` + profile `version` guard |
//! | One daily bonus per UTC day | check in the write unit + partial unique index |
//! | Ledger is append-only | UPDATE/DELETE triggers on `transactions` |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/credit-ledger/
//! ├── ledger.db         # SQLite (profiles, transactions, holds, activity_logs)
//! └── config.toml       # Amounts, cost table, pool settings
//! ```

pub mod auth;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod services;

// Re-exports
pub use auth::Role;
pub use catalog::{CostCatalog, OperationKind};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use db::{LedgerDb, Profile, Transaction, TransactionQuery, TransactionType};
pub use error::LedgerError;
pub use services::{
    BalanceSummary, Charge, CreditService, DailyBonusOutcome, EventBus, LedgerAudit, LedgerEvent,
    LedgerSettings, RecordTransactionInput, RecordedTransaction, RewardKind, Services,
};
