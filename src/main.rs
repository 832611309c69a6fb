//! chatsync - local chat history with encrypted archive backup
//!
#![doc = "chatsync - local chat history with encrypted archive backup"]
#![doc = "Main entry point for the chatsync CLI."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chatsync::cli::{Cli, Commands};
use chatsync::commands::{archive, auth, chats, Context};
use chatsync::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);
    chatsync::metrics::init_metrics_exporter();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/chatsync.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    let ctx = Context::open(config)?;

    // Execute command
    match cli.command {
        Commands::List => chats::list_chats(&ctx),
        Commands::Show { id } => chats::show_chat(&ctx, &id),
        Commands::New {
            title,
            message,
            sync,
        } => chats::new_chat(&ctx, &title, message, sync).await,
        Commands::Add {
            id,
            role,
            content,
            sync,
        } => chats::add_message(&ctx, &id, &role, &content, sync).await,
        Commands::Rename { id, title } => chats::rename_chat(&ctx, &id, &title),
        Commands::Delete { id } => chats::delete_chat(&ctx, &id),
        Commands::Sync { id } => {
            tracing::info!("Starting sync");
            archive::sync(&ctx, id).await
        }
        Commands::Restore { cid } => archive::restore(&ctx, &cid).await,
        Commands::Pull => archive::pull(&ctx).await,
        Commands::Remote => archive::list_remote(&ctx).await,
        Commands::Watch => {
            tracing::info!("Starting watch mode");
            archive::watch(&ctx).await
        }
        Commands::Export { file } => chats::export_chats(&ctx, &file),
        Commands::Import { file, replace } => chats::import_chats(&ctx, &file, replace),
        Commands::Auth { command } => auth::handle_auth(&ctx, command),
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "chatsync=debug" } else { "chatsync=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
