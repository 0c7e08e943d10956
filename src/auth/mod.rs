//! Authorization for privileged ledger operations
//!
//! The ledger never authenticates callers itself. The identity provider hands
//! us a caller id; the guard here resolves that caller's role from their
//! profile and decides whether a privileged path may run.

pub mod permissions;

pub use permissions::{require_role, Role};
