use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use instaman::api::{self, AppState};
use instaman::config;
use instaman::db;
use instaman::instagram::InstagramClient;

#[derive(Debug, Parser)]
#[command(author, version, about = "Serve the instaman JSON API")]
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
    let state = AppState {
        pool,
        instagram: Arc::new(instagram),
    };

    let app = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.api.listen_addr)
        .await
        .with_context(|| format!("could not bind {}", cfg.api.listen_addr))?;

    info!(addr = %cfg.api.listen_addr, "starting api server...");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
