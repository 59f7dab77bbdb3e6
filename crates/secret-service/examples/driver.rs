//! driver - Walk through the client API
//!
//! Opens a session, lists and searches, creates a collection and an item,
//! reads the secret back and cleans up. Runs against the simulated service by
//! default (`--policy complete` to exercise prompts) or against the desktop
//! keyring with `--bus session`:
//! `cargo run --example driver --features testing -- --bus session`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use secret_service::testing::{MemoryBus, PromptPolicy};
use secret_service::{ClientConfig, Connection, DbusConnection, Service};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BusKind {
    /// The user's session bus
    Session,
    /// An in-process simulated service
    Memory,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    Never,
    Complete,
    Dismiss,
}

impl From<Policy> for PromptPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Never => PromptPolicy::Never,
            Policy::Complete => PromptPolicy::Complete,
            Policy::Dismiss => PromptPolicy::Dismiss,
        }
    }
}

#[derive(Parser)]
#[command(name = "driver")]
#[command(about = "Exercise the secret service client")]
struct Cli {
    /// Which bus to talk to
    #[arg(long, value_enum, default_value = "memory")]
    bus: BusKind,

    /// How the simulated service answers privileged calls
    #[arg(long, value_enum, default_value = "never")]
    policy: Policy,

    /// Window identifier passed to prompts
    #[arg(long)]
    window_id: Option<String>,

    /// Client configuration file (defaults to the user config)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    if let Some(window_id) = cli.window_id {
        config.window_id = window_id;
    }

    let connection: Arc<dyn Connection> = match cli.bus {
        BusKind::Session => {
            Arc::new(DbusConnection::session().context("Failed to connect to the session bus")?)
        }
        BusKind::Memory => {
            let memory = Arc::new(MemoryBus::new());
            let login = memory.add_collection("Login", Some(config.default_alias.as_str()))?;
            let attributes = [("application", "other")];
            memory.add_item(&login, "existing", &attributes, b"hunter2", "text/plain")?;
            memory.set_prompt_policy(cli.policy.into());
            memory
        }
    };

    run(Service::with_config(connection, config))
}

fn run(service: Service) -> Result<()> {
    let session = service.open_session().context("Failed to open session")?;
    info!(session = %session.path(), "Session open");

    let mut attributes = HashMap::new();
    attributes.insert("application".to_string(), "test".to_string());

    let (unlocked, locked) = service.search_items(&attributes)?;
    println!("search: {} unlocked, {} locked", unlocked.len(), locked.len());

    for collection in service.get_all_collections()? {
        println!("collection {} ({})", collection.label()?, collection.path());
    }

    let default = service.get_default_collection()?;
    println!("default collection: {}", default.label()?);

    let collection = service
        .create_collection("test", "")
        .context("Failed to create collection")?;
    println!("created collection {}", collection.path());

    let item =
        collection.create_item(&session, "my-key", &attributes, b"my-key", "text/plain", false)?;
    println!("created item {}", item.path());

    let secrets = service.get_secrets(&[item.path().clone()], &session)?;
    for (path, secret) in &secrets {
        println!("{} = {:?}", path, secret.value_str().unwrap_or("<binary>"));
    }

    item.delete().context("Failed to delete item")?;
    println!("deleted item");

    session.close()?;
    Ok(())
}
