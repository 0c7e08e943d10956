//! Configuration for credit-ledger

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{default_cost_table, CostCatalog};
use crate::db::ConnectionOptions;
use crate::error::LedgerError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("credit-ledger")
}

/// Credits granted by earn events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardAmounts {
    #[serde(default = "default_invite_reward")]
    pub invite: i64,
    #[serde(default = "default_share_reward")]
    pub share: i64,
    #[serde(default = "default_feedback_reward")]
    pub feedback: i64,
}

fn default_invite_reward() -> i64 {
    50
}

fn default_share_reward() -> i64 {
    20
}

fn default_feedback_reward() -> i64 {
    10
}

impl Default for RewardAmounts {
    fn default() -> Self {
        Self {
            invite: default_invite_reward(),
            share: default_share_reward(),
            feedback: default_feedback_reward(),
        }
    }
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the ledger database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Database file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Maximum pooled SQLite connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a writer waits on the SQLite lock before giving up
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Attempts for a write unit that hits lock contention or a version conflict
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,

    /// Credits granted when a profile is created
    #[serde(default = "default_signup_bonus")]
    pub signup_bonus: i64,

    /// Credits granted by the daily bonus (once per UTC day)
    #[serde(default = "default_daily_bonus")]
    pub daily_bonus: i64,

    /// Credits granted by invite/share/feedback rewards
    #[serde(default)]
    pub rewards: RewardAmounts,

    /// Lifetime of an uncommitted hold, in seconds
    #[serde(default = "default_hold_ttl_secs")]
    pub hold_ttl_secs: u64,

    /// Append activity entries to this JSONL file instead of the database
    #[serde(default)]
    pub activity_log_path: Option<PathBuf>,

    /// Operation kind -> credit cost; must cover every kind
    #[serde(default = "default_cost_table")]
    pub costs: BTreeMap<String, i64>,
}

fn default_database_file() -> String {
    "ledger.db".to_string()
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_max_write_attempts() -> u32 {
    3
}

fn default_signup_bonus() -> i64 {
    100
}

fn default_daily_bonus() -> i64 {
    5
}

fn default_hold_ttl_secs() -> u64 {
    900
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_write_attempts: default_max_write_attempts(),
            signup_bonus: default_signup_bonus(),
            daily_bonus: default_daily_bonus(),
            rewards: RewardAmounts::default(),
            hold_ttl_secs: default_hold_ttl_secs(),
            activity_log_path: None,
            costs: default_cost_table(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| LedgerError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), LedgerError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| LedgerError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check amounts and build the cost catalog; fails fast on any gap
    pub fn validate(&self) -> Result<CostCatalog, LedgerError> {
        if self.signup_bonus < 0 {
            return Err(LedgerError::Config("signup_bonus must be >= 0".into()));
        }
        if self.daily_bonus <= 0 {
            return Err(LedgerError::Config("daily_bonus must be > 0".into()));
        }
        for (name, amount) in [
            ("rewards.invite", self.rewards.invite),
            ("rewards.share", self.rewards.share),
            ("rewards.feedback", self.rewards.feedback),
        ] {
            if amount <= 0 {
                return Err(LedgerError::Config(format!("{} must be > 0", name)));
            }
        }
        if self.max_write_attempts == 0 {
            return Err(LedgerError::Config("max_write_attempts must be >= 1".into()));
        }
        CostCatalog::from_table(&self.costs)
    }

    /// Get database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    /// SQLite connection settings
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            enable_wal: true,
        }
    }

    pub fn hold_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.hold_ttl_secs).unwrap_or(i64::MAX / 1_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.signup_bonus, 100);
        assert_eq!(config.daily_bonus, 5);
        assert!(config.database_path().ends_with("ledger.db"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.daily_bonus = 7;
        config.costs.insert("sem".to_string(), 12);
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.daily_bonus, 7);
        assert_eq!(loaded.costs.get("sem"), Some(&12));
        assert_eq!(loaded.rewards, RewardAmounts::default());
    }

    #[test]
    fn test_invalid_amounts_rejected() {
        let mut config = Config::default();
        config.daily_bonus = 0;
        assert!(matches!(config.validate(), Err(LedgerError::Config(_))));

        let mut config = Config::default();
        config.rewards.share = -1;
        assert!(config.validate().is_err());
    }
}
