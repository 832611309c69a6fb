//! Local chat commands: list, show, create, edit, delete, import, export

use super::Context;
use crate::error::{ChatSyncError, Result};
use crate::storage::{ChatMessage, ChatSession, Role};
use crate::transfer;
use colored::Colorize;
use prettytable::{format, Table};
use std::path::Path;

const TITLE_WIDTH: usize = 40;

/// Render epoch milliseconds as a UTC timestamp
pub(crate) fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let head: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Print every local chat as a table
pub fn list_chats(ctx: &Context) -> Result<()> {
    let sessions = ctx.store.get_all();
    if sessions.is_empty() {
        println!("{}", "No chats stored locally.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Messages".bold(),
        "Last Updated".bold(),
        "Archived".bold()
    ]);

    for session in &sessions {
        let archived = if ctx.store.needs_sync(session) {
            "pending".yellow()
        } else {
            "yes".green()
        };
        table.add_row(prettytable::row![
            short_id(&session.id).cyan(),
            truncate(&session.title, TITLE_WIDTH),
            session.messages.len(),
            format_millis(session.updated_at),
            archived
        ]);
    }

    println!("\nLocal chats:");
    table.printstd();
    if let Some(last) = ctx.store.last_sync() {
        println!("Last sync: {}", format_millis(last));
    }
    println!();
    Ok(())
}

/// Print one chat with its messages
pub fn show_chat(ctx: &Context, id: &str) -> Result<()> {
    let session = ctx.resolve_chat(id)?;

    println!("{} {}", session.title.bold(), format!("({})", session.id).dimmed());
    if let Some(address) = &session.address {
        println!("Owner: {}", address);
    }
    match &session.cid {
        Some(cid) => println!("CID:   {}", cid.cyan()),
        None => println!("CID:   {}", "not archived".yellow()),
    }
    println!();

    for message in &session.messages {
        let role = match message.role {
            Role::User => "user".blue(),
            Role::Assistant => "assistant".green(),
            Role::System => "system".magenta(),
        };
        println!("[{}] {}", format_millis(message.timestamp), role.bold());
        println!("{}\n", message.content);
    }
    Ok(())
}

/// Create a chat, optionally with a first message
pub async fn new_chat(
    ctx: &Context,
    title: &str,
    message: Option<String>,
    sync_now: bool,
) -> Result<()> {
    let mut session = ChatSession::new(title);
    session.address = ctx.config.address();
    if let Some(text) = message {
        session.push_message(ChatMessage::user(text));
    }

    let saved = ctx.store.save(session, false);
    println!("{} {}", "Created chat".green(), saved.id.cyan());
    if sync_now {
        upload_now(ctx, &saved.id).await?;
    }
    Ok(())
}

/// Append a message to a chat
pub async fn add_message(
    ctx: &Context,
    id: &str,
    role: &str,
    content: &str,
    sync_now: bool,
) -> Result<()> {
    let role: Role = role.parse().map_err(ChatSyncError::Validation)?;
    let mut session = ctx.resolve_chat(id)?;
    session.push_message(ChatMessage::new(role, content));

    let saved = ctx.store.save(session, false);
    println!(
        "{} ({} messages)",
        format!("Added {} message to {}", role, short_id(&saved.id)).green(),
        saved.messages.len()
    );
    if sync_now {
        upload_now(ctx, &saved.id).await?;
    }
    Ok(())
}

/// Change a chat's title
pub fn rename_chat(ctx: &Context, id: &str, title: &str) -> Result<()> {
    let mut session = ctx.resolve_chat(id)?;
    session.title = title.to_string();
    let saved = ctx.store.save(session, false);
    println!("{} {}", "Renamed chat".green(), saved.id.cyan());
    Ok(())
}

/// Delete a chat locally
pub fn delete_chat(ctx: &Context, id: &str) -> Result<()> {
    let session = ctx.resolve_chat(id)?;
    ctx.store.delete(&session.id);
    println!("{}", format!("Deleted chat {}", session.id).green());
    if let Some(cid) = session.cid {
        println!("The archived copy {} is kept.", cid.cyan());
    }
    Ok(())
}

/// Write every chat to `file`
pub fn export_chats(ctx: &Context, file: &Path) -> Result<()> {
    let count = transfer::export_to_file(&ctx.store, file)?;
    println!(
        "{}",
        format!("Exported {} chats to {}", count, file.display()).green()
    );
    Ok(())
}

/// Load chats from `file`
pub fn import_chats(ctx: &Context, file: &Path, replace: bool) -> Result<()> {
    let report = transfer::import_from_file(&ctx.store, file, replace)?;
    println!(
        "{}",
        format!(
            "Imported {} chats ({} overwritten)",
            report.imported, report.overwritten
        )
        .green()
    );
    Ok(())
}

async fn upload_now(ctx: &Context, id: &str) -> Result<()> {
    let manager = ctx.sync_manager()?;
    let outcome = manager.force_sync(id).await?;
    println!("{} {}", "Archived as".green(), outcome.cid.cyan());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "1970-01-01 00:00");
        assert_eq!(format_millis(1_700_000_000_000), "2023-11-14 22:13");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
