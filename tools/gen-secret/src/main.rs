use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use nest_service::services::BootstrapAuthenticator;
use nest_service::types::is_valid_hostname;

#[derive(Parser, Debug)]
#[command(name = "nest-gen-secret")]
#[command(about = "Print the bootstrap secret a device needs to apply for enrollment")]
struct Args {
    /// File holding the pre-shared key, as passed to nest-service --psk-file
    #[arg(long, env = "NEST_PSK_FILE")]
    psk_file: PathBuf,

    /// Hostname the device will apply as
    #[arg(long)]
    hostname: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if !is_valid_hostname(&args.hostname) {
        anyhow::bail!("Invalid hostname: {:?}", args.hostname);
    }

    let auth = BootstrapAuthenticator::from_file(&args.psk_file)?;
    println!("{}", auth.issue(&args.hostname));

    Ok(())
}
