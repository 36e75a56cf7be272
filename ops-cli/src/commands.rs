//! Command handlers

use crate::cli::{Command, ExportCommand, QueueCommand, TableArgs};
use crate::context::AppContext;
use anyhow::{bail, Context};
use chrono::{DateTime, Local, TimeZone, Utc};
use colored::*;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use survey_sync::export::{backup_file_name, household_rows, table_file_name, write_csv};
use survey_sync::{spawn_probe, Backup, DrainOutcome, HouseholdFilter, SyncStatus};
use tokio::sync::watch;
use uuid::Uuid;

pub async fn dispatch(ctx: &AppContext, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status => status(ctx).await,
        Command::Sync => sync_once(ctx).await,
        Command::Run => run(ctx).await,
        Command::Export(ExportCommand::Backup { output }) => {
            let path = output.unwrap_or_else(|| PathBuf::from(backup_file_name(Local::now().date_naive())));
            export_backup(ctx, &path).await?;
            println!("{} {}", "Backup written to".green(), path.display());
            Ok(())
        }
        Command::Export(ExportCommand::Table(args)) => export_table(ctx, args).await,
        Command::Queue(QueueCommand::List) => queue_list(ctx).await,
        Command::Queue(QueueCommand::Retry) => {
            let reset = ctx.engine.retry_now().await?;
            println!("{} {} entries", "Backoff cleared for".green(), reset);
            Ok(())
        }
        Command::Queue(QueueCommand::Discard { id }) => queue_discard(ctx, id).await,
        Command::Clear { force } => {
            ctx.service.clear_local_data(force).await.context(
                "local data still has unsynced entries; run `survey sync` or pass --force",
            )?;
            println!("{}", "Local survey data cleared".green());
            Ok(())
        }
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

async fn status(ctx: &AppContext) -> anyhow::Result<()> {
    let online = ctx.probe_once().await;
    let stats = ctx.service.dashboard_stats().await?;
    let last_sync = ctx.engine.last_sync_time().await?;

    println!("{}", "Survey sync status".bold());
    println!(
        "  Remote:           {}",
        if online { "reachable".green() } else { "unreachable".red() }
    );
    println!("  Households:       {} ({} today)", stats.household_count, stats.households_today);
    println!("  Individuals:      {}", stats.individual_count);
    println!("  Synced households: {}", stats.synced.to_string().green());
    println!("  Pending entries:  {}", stats.pending.to_string().yellow());
    let errors = if stats.errors > 0 {
        stats.errors.to_string().red()
    } else {
        stats.errors.to_string().normal()
    };
    println!("  Error records:    {}", errors);
    println!("  Last sync:        {}", format_time(last_sync));
    Ok(())
}

async fn sync_once(ctx: &AppContext) -> anyhow::Result<()> {
    if ctx.backend.is_none() {
        bail!("remote sync is disabled in the configuration");
    }
    ctx.probe_once().await;

    match ctx.engine.force_sync().await? {
        DrainOutcome::Completed(stats) => {
            println!(
                "{} applied {}, failed {}, deferred {}, flagged {}",
                "Drain finished:".green(),
                stats.applied,
                stats.failed,
                stats.deferred,
                stats.flagged
            );
            let pending = ctx.engine.pending_count().await?;
            if pending > 0 {
                println!("{} entries still pending", pending.to_string().yellow());
            }
        }
        DrainOutcome::AlreadyDraining => println!("{}", "A drain is already running".yellow()),
        DrainOutcome::Offline => println!("{}", "Offline; nothing sent".yellow()),
    }
    Ok(())
}

async fn run(ctx: &AppContext) -> anyhow::Result<()> {
    let Some(backend) = ctx.backend.clone() else {
        bail!("remote sync is disabled in the configuration");
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let probe_secs = ctx.config.sync.probe_interval_secs;
    let probe = if probe_secs > 0 {
        Some(spawn_probe(
            ctx.engine.connectivity().clone(),
            backend,
            Duration::from_secs(probe_secs),
            shutdown_rx.clone(),
        ))
    } else {
        ctx.engine.connectivity().set_online(true);
        None
    };
    let engine = tokio::spawn(ctx.engine.clone().run(shutdown_rx));

    println!("{}", "Sync loop running; press Ctrl-C to stop".cyan());
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);
    engine.await.context("sync loop panicked")?;
    if let Some(probe) = probe {
        probe.await.context("probe panicked")?;
    }
    Ok(())
}

pub async fn export_backup(ctx: &AppContext, path: &Path) -> anyhow::Result<()> {
    let backup = Backup::collect(ctx.engine.database()).await?;
    let json = backup.to_json_pretty()?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn parse_status(value: &str) -> anyhow::Result<SyncStatus> {
    Ok(SyncStatus::from_str(value)?)
}

async fn export_table(ctx: &AppContext, args: TableArgs) -> anyhow::Result<()> {
    let filter = HouseholdFilter {
        ward: args.ward,
        llg: args.llg,
        status: args.status.as_deref().map(parse_status).transpose()?,
    };
    let rows = household_rows(ctx.engine.database(), &filter).await?;

    let path = args
        .output
        .unwrap_or_else(|| PathBuf::from(table_file_name(Local::now().date_naive())));
    if path.as_os_str() == "-" {
        write_csv(&rows, io::stdout().lock())?;
    } else {
        let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        write_csv(&rows, BufWriter::new(file))?;
        println!("{} {} rows to {}", "Wrote".green(), rows.len(), path.display());
    }
    Ok(())
}

async fn queue_list(ctx: &AppContext) -> anyhow::Result<()> {
    let entries = ctx.engine.queue().list_pending().await?;
    if entries.is_empty() {
        println!("{}", "Queue is empty".green());
        return Ok(());
    }

    let mut out = io::stdout().lock();
    writeln!(
        out,
        "{:<36}  {:<11}  {:<36}  {:<6}  {:>8}  {:<19}  error",
        "id", "collection", "record", "op", "attempts", "next attempt"
    )?;
    for entry in entries {
        let next = if entry.next_attempt_at > 0 {
            format_time(Utc.timestamp_millis_opt(entry.next_attempt_at).single())
        } else {
            "now".to_string()
        };
        writeln!(
            out,
            "{:<36}  {:<11}  {:<36}  {:<6}  {:>8}  {:<19}  {}",
            entry.id,
            entry.collection.as_str(),
            entry.record_id,
            entry.operation.as_str(),
            entry.attempts,
            next,
            entry.error_message.unwrap_or_default()
        )?;
    }
    Ok(())
}

async fn queue_discard(ctx: &AppContext, id: Uuid) -> anyhow::Result<()> {
    match ctx.engine.discard(id).await? {
        Some(entry) => println!(
            "{} {} ({} {}); record marked as error",
            "Discarded".yellow(),
            entry.id,
            entry.collection.as_str(),
            entry.record_id
        ),
        None => bail!("no queue entry with id {}", id),
    }
    Ok(())
}
