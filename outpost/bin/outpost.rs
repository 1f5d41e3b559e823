#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::Parser;
use outpost::{Config, Outpost, config};

/// Outbound mail relay
#[derive(Parser, Debug)]
#[command(name = "outpost")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = config::locate(args.config)?;
    let config = Config::load(&config_path)?;

    if args.check {
        config.validate()?;
        println!("{}: OK", config_path.display());
        return Ok(());
    }

    Outpost::new(config).run().await
}
