use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

use crate::db::default_db_path;

#[derive(Parser, Debug)]
#[command(name = "nest-service")]
#[command(about = "Nebula enrollment service", long_about = None)]
pub struct Args {
    /// Bind address for HTTP server
    #[arg(long, env = "NEST_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Base URL clients use to reach this service (defaults to http://{bind})
    #[arg(long, env = "NEST_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Database file path
    #[arg(long, env = "NEST_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Base URL of the CA service
    #[arg(long, env = "NEST_CA_URL")]
    pub ca_url: String,

    /// Base URL of the Configuration service
    #[arg(long, env = "NEST_CONF_URL")]
    pub conf_url: String,

    /// Hostnames file maintained by the Configuration service
    #[arg(long, env = "NEST_HOSTNAMES_FILE")]
    pub hostnames_file: PathBuf,

    /// File holding the pre-shared key bootstrap secrets derive from
    #[arg(long, env = "NEST_PSK_FILE")]
    pub psk_file: PathBuf,

    /// Timeout for each CA or Configuration service request
    #[arg(long, env = "NEST_DOWNSTREAM_TIMEOUT_SECS", default_value_t = 10)]
    pub downstream_timeout_secs: u64,

    /// Log level
    #[arg(long, env = "NEST_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Settings resolved once at startup and passed to whatever needs them.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    pub public_url: String,
    pub db_path: PathBuf,
    pub ca_url: String,
    pub conf_url: String,
    pub hostnames_file: PathBuf,
    pub psk_file: PathBuf,
    pub downstream_timeout: Duration,
    pub log_level: Level,
}

impl ServiceConfig {
    pub fn from_args(args: Args) -> Result<Self> {
        let bind: SocketAddr = args
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", args.bind))?;

        if args.downstream_timeout_secs == 0 {
            anyhow::bail!("Downstream timeout must be at least one second");
        }

        let db_path = match args.db_path {
            Some(path) => path,
            None => default_db_path()?,
        };

        let public_url = args
            .public_url
            .unwrap_or_else(|| format!("http://{}", bind))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            bind,
            public_url,
            db_path,
            ca_url: args.ca_url,
            conf_url: args.conf_url,
            hostnames_file: args.hostnames_file,
            psk_file: args.psk_file,
            downstream_timeout: Duration::from_secs(args.downstream_timeout_secs),
            log_level: parse_log_level(&args.log_level),
        })
    }
}

fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
