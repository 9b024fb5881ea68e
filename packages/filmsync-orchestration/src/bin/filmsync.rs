//! Filmsync CLI
//!
//! Periodically mirrors the movies database into the search index.
//!
//! # Usage
//!
//! ```bash
//! # Run one pass and exit (non-zero on failure)
//! cargo run --bin filmsync --release -- --config config/config.json --once
//!
//! # Run forever, one pass every 5 minutes
//! RUST_LOG=filmsync_orchestration=debug cargo run --bin filmsync -- --config config/config.json
//! ```

use anyhow::Context;
use clap::Parser;
use filmsync_orchestration::{open_cursor_store, EtlConfig, RunController};
use filmsync_storage::{ElasticsearchIndex, PostgresSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "filmsync")]
#[command(about = "Synchronize the movies database into the search index", long_about = None)]
struct Cli {
    /// Pipeline configuration file
    #[arg(short, long, env = "FILMSYNC_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,

    /// Minutes between passes (overrides the config file)
    #[arg(long, env = "REFRESH_MINUTES")]
    refresh_minutes: Option<u64>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = EtlConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let refresh = Duration::from_secs(cli.refresh_minutes.unwrap_or(config.refresh_minutes).max(1) * 60);

    let db = &config.database;
    let source = PostgresSource::connect_params(
        &db.host,
        db.port,
        &db.user,
        db.password.as_deref(),
        &db.dbname,
    )
    .await
    .context("connecting to PostgreSQL")?;
    let index = ElasticsearchIndex::new(&config.elastic.host).context("building index client")?;
    info!("Connected to {}:{}/{} and {}", db.host, db.port, db.dbname, config.elastic.host);

    let mut controller = RunController::new(
        config,
        Arc::new(source),
        Arc::new(index),
        |spec| open_cursor_store(&spec.state_file_path),
    )
    .await?;

    loop {
        match controller.run_pass().await {
            Ok(_) => {}
            Err(e) if cli.once => return Err(e.into()),
            Err(e) => error!("Pass failed, retrying at next tick: {}", e),
        }

        if cli.once {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(refresh) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
        }
    }
}
