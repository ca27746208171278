//! Binary entry point for the synclist sync server.

use clap::Parser;
use log::info;
use std::sync::Arc;
use synclist_server::config::{Cli, ServerConfig};
use synclist_server::{app_router, SyncService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    config.apply_cli_overrides(&cli);

    let service = Arc::new(SyncService::open(&config.db_path)?);
    let app = app_router(service);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(
        "synclist server listening on {} (db: {})",
        config.listen_addr,
        config.db_path.display()
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
