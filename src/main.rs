use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lora_join_server::bridge;
use lora_join_server::config::Config;
use lora_join_server::dispatch::LogDataFrames;
use lora_join_server::{DeviceRegistry, FileSessionStore, JoinServer, SessionStore};

#[derive(Parser)]
#[command(name = "lora-join-server")]
#[command(about = "LoRaWAN OTAA join server speaking JSON envelopes on stdin/stdout")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Provisioning file (overrides registry.keys_file)
    #[arg(long)]
    keys: Option<PathBuf>,

    /// Session log (overrides sessions.file)
    #[arg(long)]
    sessions: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config from {:?}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });
    if let Some(keys) = cli.keys {
        config.registry.keys_file = keys;
    }
    if let Some(sessions) = cli.sessions {
        config.sessions.file = sessions;
    }

    // stdout carries envelopes, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("lora-join-server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Join policy: nonce={:?} prefixes={:?} accept delay={}ms",
        config.join.nonce_policy, config.join.key_prefixes, config.join.accept_delay_ms
    );

    let registry = DeviceRegistry::load_file(&config.registry.keys_file)?;

    let mut sessions = FileSessionStore::new(&config.sessions.file);
    let summary = sessions.load(&registry)?;
    info!(
        "Session log {:?}: {} record(s) attached",
        sessions.path(),
        summary.attached
    );

    let server = Arc::new(JoinServer::new(registry, Box::new(sessions), config.join));
    let accept_delay = server.config().accept_delay();

    info!("Waiting for envelopes on stdin...");
    bridge::run_bridge(
        server,
        Arc::new(LogDataFrames),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        accept_delay,
    )
    .await?;

    info!("Shutting down...");
    Ok(())
}
