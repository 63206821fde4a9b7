//! Command-line front-end for the proposal status sync core.
//!
//! # Responsibility
//! - Run one-shot or periodic syncs from a JSON snapshot file.
//! - Inspect the change log and clear unread entries.

use clap::{Args, Parser, Subcommand};
use log::info;
use sps_core::{
    init_logging, ChangeKind, ChangeLogService, JsonFileSource, LogNotificationSurface,
    PeriodicSynchronizer, ProposalChange, ProposalStore, SqliteProposalStore, SyncConfig,
    Synchronize, Synchronizer,
};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(name = "sps", version, about = "Track proposal status changes")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// SQLite database file.
    #[arg(long, global = true, default_value = "proposals.sqlite3")]
    db: PathBuf,
    /// JSON config file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory for rolling log files; logging is off when omitted.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print core linkage info.
    Ping,
    /// Run one sync cycle against a snapshot file.
    Sync {
        #[arg(long)]
        snapshot: PathBuf,
    },
    /// Sync periodically until interrupted.
    Watch {
        #[arg(long)]
        snapshot: PathBuf,
        /// Overrides the configured period.
        #[arg(long)]
        period_secs: Option<u64>,
    },
    /// Show the change log, newest first.
    Log {
        /// Only unread entries, oldest first. Always lists all of them.
        #[arg(long, conflicts_with = "limit")]
        unread: bool,
        /// Show at most this many of the newest entries.
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Mark change log entries as read.
    MarkRead {
        /// Change ids to mark; marks everything when empty.
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = match &cli.global.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(log_dir) = &cli.global.log_dir {
        let log_dir = absolute(log_dir)?;
        init_logging(&config.log_level, &log_dir.to_string_lossy())?;
    }

    match cli.command {
        Command::Ping => {
            println!("sps_core ping={}", sps_core::ping());
            println!("sps_core version={}", sps_core::core_version());
            Ok(())
        }
        Command::Sync { snapshot } => sync_once(&cli.global.db, &snapshot, &config).await,
        Command::Watch {
            snapshot,
            period_secs,
        } => {
            let mut config = config;
            if let Some(period_secs) = period_secs {
                config.period_secs = period_secs;
                config.validate()?;
            }
            watch(&cli.global.db, &snapshot, &config).await
        }
        Command::Log { unread, limit } => show_log(&cli.global.db, unread, limit),
        Command::MarkRead { ids } => mark_read(&cli.global.db, &ids),
    }
}

fn open_store(db: &Path) -> CliResult<Arc<SqliteProposalStore>> {
    Ok(Arc::new(SqliteProposalStore::open(db)?))
}

fn build_synchronizer(db: &Path, snapshot: &Path, config: &SyncConfig) -> CliResult<Synchronizer> {
    let store: Arc<dyn ProposalStore> = open_store(db)?;
    let synchronizer = Synchronizer::from_config(
        Arc::new(JsonFileSource::new(snapshot)),
        store,
        Arc::new(LogNotificationSurface),
        config,
    )?;
    Ok(synchronizer)
}

async fn sync_once(db: &Path, snapshot: &Path, config: &SyncConfig) -> CliResult<()> {
    let synchronizer = build_synchronizer(db, snapshot, config)?;
    let report = synchronizer.run_once().await?;
    println!(
        "cycle={} added={} updated={} removed={} notified={} unread={}",
        report.cycle_id,
        report.count(ChangeKind::Added),
        report.count(ChangeKind::Updated),
        report.count(ChangeKind::Removed),
        report.notifications.delivered,
        report
            .unread_count
            .map_or_else(|| "?".to_string(), |count| count.to_string()),
    );
    for change in &report.changes {
        println!("  {}", describe(change));
    }
    Ok(())
}

async fn watch(db: &Path, snapshot: &Path, config: &SyncConfig) -> CliResult<()> {
    let synchronizer = build_synchronizer(db, snapshot, config)?;
    let mut unread = synchronizer.unread_badge().subscribe();
    let periodic = PeriodicSynchronizer::new(synchronizer, config.period());
    let handle = periodic.spawn();
    info!(
        "event=cli_watch module=cli status=start period_secs={}",
        config.period_secs
    );
    println!("watching {} every {}s", snapshot.display(), config.period_secs);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = unread.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *unread.borrow_and_update();
                println!("unread={count}");
            }
        }
    }

    handle.stop().await;
    let stats = periodic.stats();
    println!(
        "stopped triggered={} suppressed={} completed={} failed={}",
        stats.triggered, stats.suppressed, stats.completed, stats.failed
    );
    Ok(())
}

fn show_log(db: &Path, unread_only: bool, limit: Option<u32>) -> CliResult<()> {
    let service = change_log_service(db)?;
    let changes = if unread_only {
        service.list_unread()?
    } else {
        service.list_log(limit)?
    };
    for change in &changes {
        let marker = if change.is_unread { "*" } else { " " };
        println!("{marker} {} {}", change.change_id, describe(change));
    }
    println!("unread={}", service.unread_count());
    Ok(())
}

fn mark_read(db: &Path, ids: &[String]) -> CliResult<()> {
    let service = change_log_service(db)?;
    let updated = if ids.is_empty() {
        service.mark_all_read()?
    } else {
        let ids = ids
            .iter()
            .map(|id| id.parse::<sps_core::ChangeId>())
            .collect::<Result<Vec<_>, _>>()?;
        service.mark_read(&ids)?
    };
    println!("marked={updated} unread={}", service.unread_count());
    Ok(())
}

fn change_log_service(db: &Path) -> CliResult<ChangeLogService> {
    let store: Arc<dyn ProposalStore> = open_store(db)?;
    let badge = sps_core::UnreadBadge::from_store(store.as_ref())?;
    Ok(ChangeLogService::new(store, badge))
}

fn describe(change: &ProposalChange) -> String {
    let proposal = &change.proposal;
    match (change.kind, change.previous_status) {
        (ChangeKind::Updated, Some(previous)) if previous != proposal.status => format!(
            "{} {} {} -> {}",
            change.kind.as_str(),
            proposal.id,
            previous,
            proposal.status
        ),
        _ => format!(
            "{} {} {}",
            change.kind.as_str(),
            proposal.id,
            proposal.status
        ),
    }
}

fn absolute(path: &Path) -> CliResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}
