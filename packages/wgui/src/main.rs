use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

mod cli;
mod config;

use crate::config::ClientConfig;

#[derive(Parser)]
#[command(name = "wgui")]
#[command(about = "Headless client for the wgu tunnel helper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.wgu)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring a tunnel up and keep it up until ctrl-c
    Up(UpArgs),

    /// Print the public key of a connection config
    Pubkey(PubkeyArgs),

    /// Generate a new connection config
    Genconf(GenconfArgs),
}

#[derive(Parser)]
struct UpArgs {
    /// Connection config to hand to the helper
    config: PathBuf,
}

#[derive(Parser)]
struct PubkeyArgs {
    /// Connection config to read the key from
    config: PathBuf,
}

#[derive(Parser)]
struct GenconfArgs {
    /// Name of the new config
    name: String,

    /// Output directory (defaults to the data directory)
    #[arg(long)]
    dir: Option<PathBuf>,
}

/// Filter used when `RUST_LOG` is unset
fn default_directive(debug: bool) -> &'static str {
    if debug {
        "wgui=debug,wgu_ctl=debug,info"
    } else {
        "info"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries command output, so logs go to stderr
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive(cli.debug)));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = ClientConfig::new(cli.data_dir)?;

    match cli.command {
        Commands::Up(args) => cli::up_command(&config, args.config).await,
        Commands::Pubkey(args) => cli::pubkey_command(&config, args.config).await,
        Commands::Genconf(args) => {
            cli::genconf_command(&config, &args.name, args.dir.as_deref()).await
        }
    }
}
