//! Credit Ledger CLI
//!
//! Operator tool over the ledger database. Every command prints JSON.
//!
//! ## Usage
//!
//! ```bash
//! # Provision a researcher (grants the signup bonus)
//! credit-ledger create-profile alice
//!
//! # Charge for a finished analysis
//! credit-ledger charge alice efa --related-id run-42
//!
//! # Admin correction
//! credit-ledger adjust --caller root bob 50 --reason "refund for failed export"
//!
//! # Reconcile one profile, or all of them
//! credit-ledger verify alice
//! credit-ledger verify
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use credit_ledger::services::spawn_logging_listener;
use credit_ledger::{
    Config, CreditService, OperationKind, RewardKind, Role, Services, TransactionQuery,
    TransactionType,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "credit-ledger")]
#[command(about = "Prepaid credit ledger for the statistics platform")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "CREDIT_LEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory (holds ledger.db)
    #[arg(long, env = "CREDIT_LEDGER_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Write activity to this JSON-lines file instead of the database
    #[arg(long)]
    activity_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a profile and grant the signup bonus
    CreateProfile {
        user_id: String,
        #[arg(long, default_value = "user")]
        role: Role,
    },

    /// Show balance, lifetime totals and held credits
    Balance { user_id: String },

    /// List transactions, newest first
    History {
        user_id: String,
        #[arg(long)]
        tx_type: Option<TransactionType>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Charge the catalog cost of an operation
    Charge {
        user_id: String,
        operation: OperationKind,
        #[arg(long)]
        related_id: Option<String>,
    },

    /// Grant a configured reward (invite, share, feedback)
    Reward {
        user_id: String,
        kind: RewardKind,
        #[arg(long)]
        related_id: Option<String>,
    },

    /// Admin balance adjustment (signed amount)
    Adjust {
        #[arg(long)]
        caller: String,
        target: String,
        #[arg(allow_hyphen_values = true)]
        amount: i64,
        #[arg(long)]
        reason: String,
    },

    /// Change a profile's role (admin only)
    SetRole {
        #[arg(long)]
        caller: String,
        target: String,
        role: Role,
    },

    /// Grant today's bonus if not yet claimed
    DailyBonus { user_id: String },

    /// Reconcile a profile against its ledger (every profile when omitted)
    Verify { user_id: Option<String> },

    /// Print the cost table
    Costs,

    /// Delete expired holds
    PurgeHolds,
}

#[derive(Serialize)]
struct CostRow {
    operation: &'static str,
    cost: i64,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match args.config {
        Some(ref path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(ref dir) = args.storage_dir {
        config.storage_dir = dir.clone();
    }
    if let Some(ref path) = args.activity_log {
        config.activity_log_path = Some(path.clone());
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("credit_ledger=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    if let Command::Costs = args.command {
        let catalog = config.validate()?;
        let rows: Vec<CostRow> = catalog
            .entries()
            .map(|(kind, cost)| CostRow {
                operation: kind.as_str(),
                cost,
            })
            .collect();
        return print_json(&rows);
    }

    let services = Services::open(&config).context("opening ledger")?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if args.config.is_none() && !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    // Events are buffered until the runtime runs; the listener drains them
    // once every sender is dropped.
    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    let listener = {
        let _guard = runtime.enter();
        spawn_logging_listener(services.events.clone())
    };

    let result = run(args.command, &services.credit);
    drop(services);
    if let Err(e) = runtime.block_on(listener) {
        warn!(error = %e, "Event listener failed");
    }
    result
}

fn run(command: Command, credit: &CreditService) -> anyhow::Result<()> {
    match command {
        Command::CreateProfile { user_id, role } => {
            print_json(&credit.create_profile(&user_id, role)?)
        }
        Command::Balance { user_id } => print_json(&credit.get_balance(&user_id)?),
        Command::History {
            user_id,
            tx_type,
            limit,
            offset,
        } => {
            let query = TransactionQuery {
                tx_type,
                limit,
                offset,
                ..Default::default()
            };
            print_json(&credit.list_transactions(&user_id, &query)?)
        }
        Command::Charge {
            user_id,
            operation,
            related_id,
        } => print_json(&credit.deduct_for_operation(&user_id, operation, related_id.as_deref())?),
        Command::Reward {
            user_id,
            kind,
            related_id,
        } => print_json(&credit.grant_reward(&user_id, kind, related_id.as_deref())?),
        Command::Adjust {
            caller,
            target,
            amount,
            reason,
        } => print_json(&credit.admin_adjust(&caller, &target, amount, &reason)?),
        Command::SetRole {
            caller,
            target,
            role,
        } => print_json(&credit.set_role(&caller, &target, role)?),
        Command::DailyBonus { user_id } => {
            print_json(&credit.grant_daily_bonus_if_eligible(&user_id)?)
        }
        Command::Verify { user_id: Some(user_id) } => {
            let audit = credit.verify_ledger(&user_id)?;
            print_json(&audit)?;
            if !audit.is_consistent() {
                anyhow::bail!("ledger for {} is inconsistent", user_id);
            }
            Ok(())
        }
        Command::Verify { user_id: None } => {
            let failures = credit.verify_all()?;
            print_json(&failures)?;
            if !failures.is_empty() {
                anyhow::bail!("{} inconsistent ledger(s)", failures.len());
            }
            Ok(())
        }
        Command::PurgeHolds => {
            let purged = credit.purge_expired_holds()?;
            print_json(&serde_json::json!({ "purged": purged }))
        }
        Command::Costs => Ok(()),
    }
}
