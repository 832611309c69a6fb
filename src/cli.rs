//! Command-line interface definition for chatsync
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for browsing local chats, syncing them to the
//! archive, and managing the archive credential.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// chatsync - local chat history with encrypted archive backup
///
/// Chats are stored locally and uploaded, encrypted with the owner's
/// address, to a content-addressed archive.
#[derive(Parser, Debug, Clone)]
#[command(name = "chatsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/chatsync.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Override the local store location
    #[arg(long, global = true)]
    pub storage_path: Option<String>,

    /// Owner address used as encryption key material
    #[arg(long, global = true)]
    pub address: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for chatsync
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List local chats
    List,

    /// Show the messages of a chat
    Show {
        /// Chat id or unique id prefix
        id: String,
    },

    /// Create a chat
    New {
        /// Chat title
        title: String,

        /// First user message
        #[arg(short, long)]
        message: Option<String>,

        /// Upload immediately instead of waiting for the next sync
        #[arg(long)]
        sync: bool,
    },

    /// Append a message to a chat
    Add {
        /// Chat id or unique id prefix
        id: String,

        /// Message role (user, assistant, system)
        role: String,

        /// Message text
        content: String,

        /// Upload immediately instead of waiting for the next sync
        #[arg(long)]
        sync: bool,
    },

    /// Rename a chat
    Rename {
        /// Chat id or unique id prefix
        id: String,

        /// New title
        title: String,
    },

    /// Delete a chat locally (archived copies are kept)
    Delete {
        /// Chat id or unique id prefix
        id: String,
    },

    /// Upload chats that changed since their last upload
    Sync {
        /// Upload only this chat
        #[arg(long)]
        id: Option<String>,
    },

    /// Fetch, decrypt and store an archived chat
    Restore {
        /// Content identifier of the archived chat
        cid: String,
    },

    /// Restore every archived chat of the current address
    Pull,

    /// List archived chats of the current address
    Remote,

    /// Run periodic sync until interrupted
    Watch,

    /// Export all chats to a JSON file
    Export {
        /// Destination file
        file: PathBuf,
    },

    /// Import chats from a JSON export
    Import {
        /// Source file
        file: PathBuf,

        /// Clear the local store before importing
        #[arg(long)]
        replace: bool,
    },

    /// Manage the archive credential
    Auth {
        /// Credential subcommand
        #[command(subcommand)]
        command: AuthCommand,
    },
}

/// Archive credential subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum AuthCommand {
    /// Store an API key in the OS keyring
    Set {
        /// Archive API key
        key: String,
    },

    /// Remove the stored API key
    Clear,

    /// Show which credential is in effect
    Status,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/chatsync.yaml".to_string()),
            verbose: false,
            json_logs: false,
            storage_path: None,
            address: None,
            command: Commands::List,
        }
    }
}
