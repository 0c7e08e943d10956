//! Service layer for credit-ledger
//!
//! Services encapsulate ledger rules between callers and repositories.
//! The credit service wraps database operations with:
//! - Input validation
//! - Authorization of privileged paths
//! - Transaction boundaries (one immediate transaction per balance change)
//! - Event emission for audit/notifications
//!
//! ## Architecture
//!
//! ```text
//! Feature code / CLI (thin)
//!     ↓
//! CreditService (ledger rules)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod credit_service;
pub mod events;

// Re-exports
pub use credit_service::{
    BalanceSummary, Charge, CreditService, DailyBonusOutcome, LedgerAudit, LedgerSettings,
    RecordTransactionInput, RecordedTransaction, RewardKind,
};
pub use events::{spawn_logging_listener, EventBus, EventListener, LedgerEvent};

use std::sync::Arc;

use tracing::info;

use crate::catalog::CostCatalog;
use crate::config::Config;
use crate::db::LedgerDb;
use crate::error::LedgerError;
use crate::logging::{ActivityLogger, JsonlActivityLogger, SqliteActivityLogger};

/// Service container for dependency injection
pub struct Services {
    pub credit: Arc<CreditService>,
    pub events: Arc<EventBus>,
    pub db: LedgerDb,
}

impl Services {
    /// Validate the config, open the database and wire the credit service.
    ///
    /// Activity goes to the JSONL file when one is configured, otherwise to
    /// the `activity_logs` table.
    pub fn open(config: &Config) -> Result<Self, LedgerError> {
        let catalog = config.validate()?;
        std::fs::create_dir_all(&config.storage_dir)?;

        let db = LedgerDb::open(
            &config.database_path(),
            config.pool_size,
            config.connection_options(),
        )?;

        let activity: Arc<dyn ActivityLogger> = match config.activity_log_path {
            Some(ref path) => Arc::new(JsonlActivityLogger::open(path)?),
            None => Arc::new(SqliteActivityLogger::new(db.clone())),
        };

        let services = Self::build(db, Arc::new(catalog), LedgerSettings::from_config(config), Some(activity));
        info!(db = %config.database_path().display(), "Ledger services ready");
        Ok(services)
    }

    /// Create services over an already opened database (no activity sink)
    pub fn new(db: LedgerDb, catalog: Arc<CostCatalog>, settings: LedgerSettings) -> Self {
        Self::build(db, catalog, settings, None)
    }

    /// Create services over an in-memory database with default settings (for testing)
    pub fn in_memory() -> Result<Self, LedgerError> {
        let db = LedgerDb::open_in_memory()?;
        Ok(Self::new(db, Arc::new(CostCatalog::default()), LedgerSettings::default()))
    }

    fn build(
        db: LedgerDb,
        catalog: Arc<CostCatalog>,
        settings: LedgerSettings,
        activity: Option<Arc<dyn ActivityLogger>>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let mut credit = CreditService::new(db.clone(), catalog, settings, events.clone());
        if let Some(activity) = activity {
            credit = credit.with_activity_logger(activity);
        }

        Self {
            credit: Arc::new(credit),
            events,
            db,
        }
    }
}
