//! Logging infrastructure for the ledger
//!
//! Non-financial usage events ("ran an EFA") live here. They sit next to the
//! ledger but never take part in its consistency: a failed activity write is
//! logged and dropped.

pub mod activity;

pub use activity::{
    ActivityEntry, ActivityLogger, JsonlActivityLogger, NoopActivityLogger, SqliteActivityLogger,
};
