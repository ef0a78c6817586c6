//! vouch-extension-npm - npm ecosystem extension for Vouch
//!
//! Speaks the extension protocol on stdin/stdout. Logs go to stderr, which
//! the core forwards into its own log.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vouch_core::extension::serve_stdio;

mod handler;
mod manifest;
mod registry;

use handler::NpmExtension;
use registry::{RegistryClient, DEFAULT_REGISTRY_URL};

#[derive(Parser, Debug)]
#[clap(
    name = "vouch-extension-npm",
    about = "npm ecosystem extension for Vouch",
    version
)]
struct Cli {
    /// Registry API used to locate source archives
    #[clap(long, default_value = DEFAULT_REGISTRY_URL)]
    registry_url: String,

    /// Never contact the registry; describe reports website URLs only
    #[clap(long)]
    offline: bool,

    /// Log filter directive (e.g. "debug", "vouch_npm=trace")
    #[clap(long, default_value = "info")]
    log_level: String,
}

fn initialize_tracing(directive: &str) {
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries protocol frames, so logs MUST go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level);

    let extension = if cli.offline {
        NpmExtension::offline()
    } else {
        NpmExtension::new(Some(RegistryClient::new(cli.registry_url)?))
    };

    serve_stdio(&extension)
        .await
        .context("Extension protocol session failed")?;
    Ok(())
}
