//! Archive commands: sync, restore, pull, remote listing and watch

use super::chats::format_millis;
use super::Context;
use crate::error::Result;
use crate::sync::SyncEvent;
use colored::Colorize;
use prettytable::{format, Table};
use tokio::sync::broadcast::error::RecvError;

/// Upload one chat, or every chat that changed since its last upload
pub async fn sync(ctx: &Context, id: Option<String>) -> Result<()> {
    let manager = ctx.sync_manager()?;

    match id {
        Some(id) => {
            let session = ctx.resolve_chat(&id)?;
            let outcome = manager.force_sync(&session.id).await?;
            println!(
                "{} {} {}",
                "Archived".green(),
                session.id,
                format!("as {}", outcome.cid).cyan()
            );
        }
        None => {
            let report = manager.sync_all().await;
            println!(
                "Uploaded {}, unchanged {}, failed {}",
                report.uploaded.to_string().green(),
                report.skipped,
                if report.failed > 0 {
                    report.failed.to_string().red()
                } else {
                    report.failed.to_string().normal()
                }
            );
        }
    }
    Ok(())
}

/// Fetch one archived chat into the local store
pub async fn restore(ctx: &Context, cid: &str) -> Result<()> {
    let address = ctx.require_address()?;
    let manager = ctx.sync_manager()?;
    let session = manager.restore(cid, &address).await?;
    println!(
        "{} {} ({} messages)",
        "Restored".green(),
        session.title.bold(),
        session.messages.len()
    );
    Ok(())
}

/// Restore every archived chat that is newer than its local copy
pub async fn pull(ctx: &Context) -> Result<()> {
    let address = ctx.require_address()?;
    let manager = ctx.sync_manager()?;
    let report = manager.pull(&address).await?;
    println!(
        "Restored {}, up to date {}, failed {}",
        report.restored.to_string().green(),
        report.unchanged,
        report.failed
    );
    Ok(())
}

/// List archived chats owned by the configured address
pub async fn list_remote(ctx: &Context) -> Result<()> {
    let address = ctx.require_address()?;
    let manager = ctx.sync_manager()?;
    let objects = manager.list_remote(&address).await?;

    if objects.is_empty() {
        println!("{}", format!("No archived chats for {}", address).yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "CID".bold(),
        "Chat".bold(),
        "Messages".bold(),
        "Uploaded".bold(),
        "Size".bold()
    ]);
    for object in objects {
        let (chat, messages, uploaded) = match &object.metadata {
            Some(m) => (
                m.session_id.clone().unwrap_or_else(|| "-".to_string()),
                m.message_count.to_string(),
                format_millis(m.timestamp),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };
        table.add_row(prettytable::row![
            object.cid.cyan(),
            chat,
            messages,
            uploaded,
            object.size
        ]);
    }
    table.printstd();
    Ok(())
}

/// Sync now, then keep syncing periodically until Ctrl-C
pub async fn watch(ctx: &Context) -> Result<()> {
    let address = ctx.require_address()?;
    let manager = ctx.sync_manager()?;
    let mut events = manager.subscribe();

    manager.start();
    let initial = manager.sync_all().await;
    println!(
        "Initial sync: {} uploaded, {} failed",
        initial.uploaded, initial.failed
    );
    if !ctx.config.sync.periodic {
        println!("Periodic sync is disabled in the configuration.");
        manager.stop();
        return Ok(());
    }
    manager.start_periodic_sync(&address);
    println!(
        "Watching for changes every {:?}. Press {} to stop.",
        ctx.config.sync.interval(),
        "Ctrl-C".bold()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SyncEvent::Uploaded(outcome)) if outcome.applied => {
                    println!("{} {} -> {}", "Archived".green(), outcome.session_id, outcome.cid.cyan());
                }
                Ok(SyncEvent::Uploaded(_)) => {}
                Ok(SyncEvent::Failed { session_id, message, persistent: true }) => {
                    eprintln!("{} {}: {}", "Sync needs attention".red(), session_id, message);
                }
                Ok(SyncEvent::Failed { .. }) => {}
                Ok(SyncEvent::SweepFinished(report)) if report.uploaded + report.failed > 0 => {
                    println!("Sweep: {} uploaded, {} failed", report.uploaded, report.failed);
                }
                Ok(SyncEvent::SweepFinished(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Dropped {} sync events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.stop();
    println!("Stopped.");
    Ok(())
}
