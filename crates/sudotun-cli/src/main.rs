//! sudotun: profile management front-end.
//!
//! Imports and exports `sudoku://` short links, manages the saved-profile
//! store, and renders the relay configuration a profile would produce
//! (resolving the server address on the way) without starting anything.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use sudotun_net::{Resolver, build_config};
use sudotun_proto::encode;
use sudotun_session::{FileStore, NodeStore};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "sudotun", version, about = "Tunnel client profile manager")]
struct Cli {
    /// Profile store path (.json or .toml)
    #[arg(long, default_value = "nodes.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a sudoku:// short link and make it the active profile
    Import {
        link: String,
        /// Display name for the imported profile
        #[arg(long)]
        name: Option<String>,
    },
    /// Re-encode a stored profile as a short link
    Export {
        id: String,
        /// Embed this host instead of the configured one
        #[arg(long)]
        advertise_host: Option<String>,
    },
    /// List stored profiles
    List,
    /// Render the relay config JSON a profile would produce
    Show { id: String },
    /// Remove a profile
    Remove { id: String },
    /// Mark a profile as the active selection
    Use { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let store = FileStore::new(&cli.store);

    match cli.command {
        Command::Import { link, name } => {
            let node = store
                .import_link(&link, name.as_deref())
                .await
                .context("failed to import short link")?;
            println!("{}  {}", node.id, node.display_name());
        }
        Command::Export { id, advertise_host } => {
            let node = fetch(&store, &id).await?;
            println!("{}", encode(&node, advertise_host.as_deref()));
        }
        Command::List => {
            let active = store.active_id().await?;
            let nodes = store.list().await?;
            if nodes.is_empty() {
                info!("no profiles stored");
            }
            for node in nodes {
                let marker = if active.as_deref() == Some(&node.id) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {}  {}  {}:{}",
                    node.id,
                    node.display_name(),
                    node.host,
                    node.port
                );
            }
        }
        Command::Show { id } => {
            let node = fetch(&store, &id).await?;
            let resolver = Resolver::system().context("system resolver unavailable")?;
            let config = build_config(&node, &resolver)
                .await
                .context("failed to assemble relay config")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Remove { id } => {
            let node = fetch(&store, &id).await?;
            store.remove(&node.id).await?;
            info!(node = %node.display_name(), "removed profile");
        }
        Command::Use { id } => {
            let node = fetch(&store, &id).await?;
            store.set_active_id(Some(&node.id)).await?;
            info!(node = %node.display_name(), "active profile set");
        }
    }

    Ok(())
}

/// Look a profile up by exact id, falling back to a unique id prefix.
async fn fetch(store: &FileStore, id: &str) -> Result<sudotun_proto::NodeProfile> {
    if let Some(node) = store.get(id).await? {
        return Ok(node);
    }
    let mut matches: Vec<_> = store
        .list()
        .await?
        .into_iter()
        .filter(|n| n.id.starts_with(id))
        .collect();
    match matches.len() {
        1 => Ok(matches.swap_remove(0)),
        0 => bail!("no profile matches '{id}'"),
        n => bail!("'{id}' is ambiguous ({n} matches)"),
    }
}
