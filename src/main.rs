use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};

use instaman::config;
use instaman::db;
use instaman::instagram::InstagramClient;
use instaman::worker::{self, Pacing};

#[derive(Debug, Parser)]
#[command(author, version, about = "Run the copy-job worker")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/instaman.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let instagram = InstagramClient::from_config(&cfg)?;
    let pacing = Pacing::from_config(&cfg.worker);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "could not listen for shutdown signal");
            return;
        }
        let _ = shutdown_tx.send(true);
    });

    info!("starting worker...");
    worker::run_scheduler(&pool, &instagram, &pacing, shutdown_rx).await;

    Ok(())
}
