//! # TgFleet — fleet risk control CLI
//!
//! Usage:
//!   tgfleet init                        # Write default config to ~/.tgfleet/config.toml
//!   tgfleet recover                     # Run cooling + warning recovery once
//!   tgfleet daemon                      # Run cron-driven recovery sweeps until Ctrl-C
//!   tgfleet accounts                    # List accounts with risk state
//!   tgfleet tasks --status running      # List tasks in a status
//!   tgfleet logs --limit 50             # Recent task/account log entries
//!   tgfleet settings 7 --max-failures 5 # Show or change a user's risk settings

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tgfleet_core::traits::RiskSettingsRepository;
use tgfleet_core::{FleetConfig, RiskSettings, TaskStatus, UserId};
use tgfleet_risk::RiskControl;
use tgfleet_store::SqliteStore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tgfleet",
    version,
    about = "🛡️ TgFleet — task scheduling and risk control for Telegram account fleets"
)]
struct Cli {
    /// Config file (default: ~/.tgfleet/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
    /// Run both recovery sweeps once
    Recover,
    /// Run recovery sweeps on their cron schedules until Ctrl-C
    Daemon,
    /// List accounts with status, failure counter and cooldown
    Accounts,
    /// List tasks in a given status
    Tasks {
        #[arg(long, default_value = "running")]
        status: TaskStatus,
    },
    /// Show recent log entries
    Logs {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show or update a user's risk settings
    Settings {
        user_id: UserId,
        #[arg(long)]
        max_failures: Option<u32>,
        #[arg(long)]
        cooling_minutes: Option<u32>,
    },
}

fn config_path(cli: &Cli) -> PathBuf {
    match &cli.config {
        Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
        None => FleetConfig::default_path(),
    }
}

fn load_config(path: &PathBuf) -> Result<FleetConfig> {
    if path.exists() {
        FleetConfig::load_from(path).with_context(|| format!("loading {}", path.display()))
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        Ok(FleetConfig::default())
    }
}

fn open_store(config: &FleetConfig) -> Result<Arc<SqliteStore>> {
    let db_path = config.storage.resolved_db_path();
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    Ok(Arc::new(store))
}

fn risk_control(store: &Arc<SqliteStore>, config: &FleetConfig) -> Arc<RiskControl> {
    Arc::new(RiskControl::new(
        store.clone(),
        store.clone(),
        store.clone(),
        config.risk.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "tgfleet=debug,tgfleet_risk=debug,tgfleet_scheduler=debug,tgfleet_store=debug"
    } else {
        "tgfleet=info,tgfleet_risk=info,tgfleet_scheduler=info,tgfleet_store=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let path = config_path(&cli);
    match cli.command {
        Command::Init { force } => init_config(&path, force),
        command => {
            let config = load_config(&path)?;
            let store = open_store(&config)?;
            run(command, &config, &store).await
        }
    }
}

fn init_config(path: &PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("⚠️  Config already exists at {} (use --force to overwrite)", path.display());
        return Ok(());
    }
    FleetConfig::default().save_to(path)?;
    println!("✅ Config written to {}", path.display());
    Ok(())
}

async fn run(command: Command, config: &FleetConfig, store: &Arc<SqliteStore>) -> Result<()> {
    match command {
        // Needs no store; handled in main.
        Command::Init { .. } => {}
        Command::Recover => {
            let report = tgfleet_risk::run_all(&risk_control(store, config)).await?;
            println!("🔓 Recovery sweep complete");
            println!("   Cooling → normal: {}", report.cooling_recovered);
            println!("   Warning → normal: {}", report.warnings_recovered);
        }
        Command::Daemon => {
            if !config.recovery.enabled {
                println!("⚠️  Recovery is disabled in config ([recovery] enabled = false)");
                return Ok(());
            }
            let shutdown = CancellationToken::new();
            let handle = tgfleet_risk::spawn_recovery_loop(
                risk_control(store, config),
                &config.recovery,
                shutdown.clone(),
            )?;
            tokio::signal::ctrl_c().await?;
            tracing::info!("🛑 Ctrl-C received, stopping");
            shutdown.cancel();
            handle.await?;
        }
        Command::Accounts => {
            let accounts = store.list_accounts()?;
            if accounts.is_empty() {
                println!("No accounts.");
                return Ok(());
            }
            println!(
                "{:<8} {:<8} {:<16} {:<11} {:>5}  COOLING UNTIL",
                "ID", "USER", "PHONE", "STATUS", "FAILS"
            );
            for acc in accounts {
                let until = acc
                    .cooling_until
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:<8} {:<8} {:<16} {:<11} {:>5}  {}",
                    acc.id,
                    acc.user_id,
                    acc.phone,
                    acc.status.as_str(),
                    acc.consecutive_failures,
                    until
                );
            }
        }
        Command::Tasks { status } => {
            let tasks = store.list_tasks_by_status(status)?;
            println!("📋 {} task(s) {status}", tasks.len());
            for task in tasks {
                println!(
                    "  #{:<6} {:<16} accounts={:<4} created={}",
                    task.id,
                    task.task_type.as_str(),
                    task.account_targets.len(),
                    task.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::Logs { limit } => {
            for entry in store.recent_logs(limit)? {
                let scope = match (entry.task_id, entry.account_id) {
                    (Some(t), Some(a)) => format!("task={t} account={a}"),
                    (Some(t), None) => format!("task={t}"),
                    (None, Some(a)) => format!("account={a}"),
                    (None, None) => "-".into(),
                };
                println!(
                    "{} [{:<5}] {:<24} {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.level.as_str(),
                    scope,
                    entry.message
                );
            }
        }
        Command::Settings {
            user_id,
            max_failures,
            cooling_minutes,
        } => {
            let risk = risk_control(store, config);
            let mut settings: RiskSettings = risk.settings_for(user_id).await?;
            if max_failures.is_some() || cooling_minutes.is_some() {
                if let Some(n) = max_failures {
                    settings.max_consecutive_failures = n;
                }
                if let Some(m) = cooling_minutes {
                    settings.cooling_duration_minutes = m;
                }
                store.save_settings(user_id, settings).await?;
                settings = risk.settings_for(user_id).await?;
                println!("✅ Settings saved for user {user_id}");
            }
            println!("   Max consecutive failures: {}", settings.max_consecutive_failures);
            println!("   Cooling duration:         {}m", settings.cooling_duration_minutes);
        }
    }

    Ok(())
}
