use clap::Parser;
use keyward_server::server::AppState;
use keyward_server::{cleanup, config, server, storage};
use keyward_core::token::TokenIssuer;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keyward-server", about = "Keyward credential vault server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "keyward.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        config::ServerConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file found, using defaults");
        config::ServerConfig::default()
    };

    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(database) = cli.database {
        cfg.storage_path = database;
    }

    // Fatal when unset: the server refuses to run with a guessable secret.
    let signing_secret = cfg.resolve_signing_secret()?;

    tracing::info!("Starting keyward-server on {}", cfg.listen_addr);

    let storage = storage::ServerStorage::open(&cfg.storage_path)?;
    cleanup::spawn_cleanup_task(storage.clone());

    let state = AppState::new(storage, TokenIssuer::new(signing_secret), &cfg);
    let app = server::build_router(state, &cfg);

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
