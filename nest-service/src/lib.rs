pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod types;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use api::ncsr::AppState;
use config::ServiceConfig;
use services::{
    BootstrapAuthenticator, EnrollmentService, HttpCaClient, HttpConfClient, RecordStore,
};

/// Wire the production collaborators together.
pub fn build_state(config: &ServiceConfig) -> Result<Arc<AppState>> {
    let db = db::init_db(&config.db_path)?;
    let bootstrap = BootstrapAuthenticator::from_file(&config.psk_file)?;

    info!("CA service: {}", config.ca_url);
    let ca = HttpCaClient::new(&config.ca_url, config.downstream_timeout)?;

    info!(
        "Configuration service: {} (hostnames file {:?})",
        config.conf_url, config.hostnames_file
    );
    let conf = HttpConfClient::new(
        &config.conf_url,
        config.hostnames_file.clone(),
        config.downstream_timeout,
    )?;

    let enrollment = EnrollmentService::new(
        RecordStore::new(db),
        bootstrap,
        Arc::new(ca),
        Arc::new(conf),
        &config.public_url,
    );

    Ok(Arc::new(AppState {
        enrollment: Arc::new(enrollment),
    }))
}
