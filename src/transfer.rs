//! Import and export of the local chat history
//!
//! Exports are pretty-printed JSON of the form
//! `{ "version": 1, "exportedAt": <ms>, "chats": [...] }`. Imports accept that
//! document or a bare array of sessions. The whole payload is validated
//! before anything is written, so a bad file never leaves a half import.

use crate::error::{ChatSyncError, Result};
use crate::storage::{now_millis, ChatSession, LocalStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Export document version written by this build
pub const EXPORT_VERSION: u32 = 1;

/// Serialized chat history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatExport {
    /// Document version
    pub version: u32,
    /// Export time, milliseconds since the epoch
    pub exported_at: i64,
    /// Every exported session
    pub chats: Vec<ChatSession>,
}

/// What an import did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Sessions written to the store
    pub imported: usize,
    /// Sessions that replaced an existing one with the same id
    pub overwritten: usize,
    /// Whether the store was cleared first
    pub replaced: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ImportPayload {
    Document(ChatExport),
    Bare(Vec<ChatSession>),
}

/// Snapshot every session in the store
pub fn export(store: &LocalStore) -> ChatExport {
    ChatExport {
        version: EXPORT_VERSION,
        exported_at: now_millis(),
        chats: store.get_all(),
    }
}

/// Write the store to `path` as pretty JSON; returns the number of sessions
pub fn export_to_file(store: &LocalStore, path: impl AsRef<Path>) -> Result<usize> {
    let document = export(store);
    let json = serde_json::to_string_pretty(&document)?;
    std::fs::write(path.as_ref(), json)?;
    tracing::info!(
        "Exported {} chats to {}",
        document.chats.len(),
        path.as_ref().display()
    );
    Ok(document.chats.len())
}

/// Check one session for the structural invariants the store relies on
///
/// # Errors
///
/// Returns `Validation` naming the offending session
pub fn validate_session(session: &ChatSession) -> Result<()> {
    if session.id.trim().is_empty() {
        return Err(ChatSyncError::Validation("chat with an empty id".into()).into());
    }
    if session.created_at > session.updated_at {
        return Err(ChatSyncError::Validation(format!(
            "chat {} was updated before it was created",
            session.id
        ))
        .into());
    }
    let mut message_ids = HashSet::new();
    for message in &session.messages {
        if message.id.trim().is_empty() {
            return Err(ChatSyncError::Validation(format!(
                "chat {} has a message with an empty id",
                session.id
            ))
            .into());
        }
        if !message_ids.insert(message.id.as_str()) {
            return Err(ChatSyncError::Validation(format!(
                "chat {} repeats message id {}",
                session.id, message.id
            ))
            .into());
        }
    }
    Ok(())
}

/// Parse and validate an import payload without touching any store
///
/// # Errors
///
/// Returns `Validation` for malformed JSON, unknown roles, unsupported
/// versions, duplicate session ids or any invalid session
pub fn parse(json: &str) -> Result<Vec<ChatSession>> {
    let payload: ImportPayload = serde_json::from_str(json)
        .map_err(|e| ChatSyncError::Validation(format!("not a chat export: {}", e)))?;

    let chats = match payload {
        ImportPayload::Document(document) => {
            if document.version == 0 || document.version > EXPORT_VERSION {
                return Err(ChatSyncError::Validation(format!(
                    "unsupported export version {}",
                    document.version
                ))
                .into());
            }
            document.chats
        }
        ImportPayload::Bare(chats) => chats,
    };

    let mut seen = HashSet::new();
    for session in &chats {
        validate_session(session)?;
        if !seen.insert(session.id.as_str()) {
            return Err(ChatSyncError::Validation(format!(
                "chat id {} appears more than once",
                session.id
            ))
            .into());
        }
    }
    Ok(chats)
}

/// Import a payload into `store`
///
/// With `replace`, the store is cleared first; otherwise sessions with
/// matching ids are overwritten and the rest are kept. Imported sessions are
/// written verbatim and are not scheduled for upload.
pub fn import(store: &LocalStore, json: &str, replace: bool) -> Result<ImportReport> {
    let chats = parse(json)?;

    let overwritten = if replace {
        store.clear();
        0
    } else {
        chats
            .iter()
            .filter(|c| store.get_by_id(&c.id).is_some())
            .count()
    };
    let imported = store.put_many(chats);

    tracing::info!(
        "Imported {} chats ({} overwritten, replace={})",
        imported,
        overwritten,
        replace
    );
    Ok(ImportReport {
        imported,
        overwritten,
        replaced: replace,
    })
}

/// Read `path` and import it into `store`
pub fn import_from_file(
    store: &LocalStore,
    path: impl AsRef<Path>,
    replace: bool,
) -> Result<ImportReport> {
    let json = std::fs::read_to_string(path.as_ref())?;
    import(store, &json, replace)
}
