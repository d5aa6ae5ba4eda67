use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use nest_service::api;
use nest_service::config::{Args, ServiceConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::from_args(Args::parse())?;

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Nebula enrollment service");
    info!("Database: {:?}", config.db_path);

    let state = nest_service::build_state(&config)?;

    // Create router
    let app = api::create_router(state);

    info!("Listening on http://{} (public URL {})", config.bind, config.public_url);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
