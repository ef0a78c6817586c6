//! Vouch - peer-reviewed trust for the dependencies you install
//!
//! Main entry point for the `vouch` command

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::future::Future;
use std::path::PathBuf;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

use vouch_core::config::VouchConfig;
use vouch_core::keys::AuthorKey;
use vouch_core::paths::VouchPaths;
use vouch_core::store::ReviewStore;
use vouch_core::sync::{GitRepository, PeerRegistry};

mod check_cli;
mod config_cli;
mod extension_cli;
mod peer_cli;
mod review_cli;
mod sync_cli;
mod workspace;

use workspace::Workspace;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "vouch",
    about = "Peer-reviewed trust for the dependencies you install",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON lines
    #[clap(long, global = true)]
    log_json: bool,

    /// Vouch home directory (overrides VOUCH_HOME)
    #[clap(long, global = true)]
    home: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Create the vouch home, author key and review repository
    Setup {
        /// Remote of your own review repository; omit for a local-only one
        repo_url: Option<String>,
    },

    /// Manage ecosystem extensions
    Extension {
        #[clap(subcommand)]
        command: extension_cli::ExtensionCommand,
    },

    /// Review a package version
    Review {
        /// Ecosystem id, e.g. "npm"
        ecosystem: String,
        package: String,
        version: String,

        /// Rating from -1.0 (avoid) to +1.0 (trust)
        #[clap(long, allow_hyphen_values = true)]
        rating: f64,

        /// Free-text comment
        #[clap(long)]
        comment: Option<String>,

        /// Id of your earlier review of the same version that this one replaces
        #[clap(long)]
        supersedes: Option<String>,
    },

    /// Manage the peers whose reviews you import
    Peer {
        #[clap(subcommand)]
        command: peer_cli::PeerCommand,
    },

    /// Fetch reviews from peers, then publish your own
    Sync {
        /// Only fetch; do not publish local reviews
        #[clap(long)]
        no_publish: bool,
    },

    /// Score every dependency of a project
    Check {
        /// Project directory
        #[clap(default_value = ".")]
        path: PathBuf,

        /// Output the report as JSON
        #[clap(long)]
        json: bool,
    },

    /// Show the trust aggregate for one package version
    Score {
        ecosystem: String,
        package: String,
        version: String,

        /// Output as JSON
        #[clap(long)]
        json: bool,

        /// List the individual reviews
        #[clap(long)]
        reviews: bool,
    },

    /// Read or change settings
    Config {
        #[clap(subcommand)]
        command: config_cli::ConfigCommand,
    },
}

/// Initialize tracing with CLI flags
///
/// Logs go to stderr; stdout carries only command output.
fn initialize_tracing(log_level: &LogLevel, json: bool) {
    let filter = EnvFilter::new(log_level.to_filter_directive());
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level, cli.log_json);

    let home = cli.home;
    match cli.command {
        Command::Setup { repo_url } => setup_command(home, repo_url).await,
        Command::Extension { command } => command.execute(home).await,
        Command::Peer { command } => command.execute(home).await,
        Command::Config { command } => command.execute(home).await,
        Command::Review {
            ecosystem,
            package,
            version,
            rating,
            comment,
            supersedes,
        } => {
            let workspace = Workspace::open(home)?;
            review_cli::review_command(
                &workspace,
                review_cli::ReviewArgs {
                    ecosystem,
                    package,
                    version,
                    rating,
                    comment,
                    supersedes,
                },
            )
            .await
        }
        Command::Score {
            ecosystem,
            package,
            version,
            json,
            reviews,
        } => {
            let workspace = Workspace::open(home)?;
            review_cli::score_command(&workspace, &ecosystem, &package, &version, json, reviews)
                .await
        }
        Command::Sync { no_publish } => {
            let workspace = Workspace::open(home)?;
            let published = interruptible(sync_cli::sync_command(&workspace, !no_publish)).await?;
            if !published {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Check { path, json } => {
            let workspace = Workspace::open(home)?;
            let passed = interruptible(check_cli::check_command(&workspace, &path, json)).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Race a long-running command against Ctrl-C
///
/// Dropping the command future kills extension and git child processes;
/// reviews already written stay durable.
async fn interruptible<T>(command: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        result = command => result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            eprintln!("Interrupted");
            std::process::exit(1);
        }
    }
}

async fn setup_command(home: Option<PathBuf>, repo_url: Option<String>) -> Result<()> {
    let paths = VouchPaths::discover(home)?;
    let mut config = if paths.is_initialized() {
        println!("Updating existing vouch home at {}", paths.root.display());
        VouchConfig::load_from_path(&paths.config_file)?
    } else {
        VouchConfig::default()
    };
    paths.initialize()?;

    if let Some(url) = repo_url {
        config.core.repository_url = Some(url);
    }
    config.validate()?;

    let key_path = config
        .core
        .author_key_file
        .clone()
        .unwrap_or_else(|| paths.author_key_file.clone());
    let key = AuthorKey::load_or_create(&key_path)?;

    ReviewStore::open(&paths.store_dir)
        .await
        .context("Failed to create review store")?;
    if !paths.peers_file.exists() {
        PeerRegistry::default().save_to_path(&paths.peers_file)?;
    }

    let url = config.core.repository_url.as_deref();
    let repository_kind = match GitRepository::setup(
        paths.repository_dir.clone(),
        url,
        config.sync.git_timeout(),
    )
    .await
    {
        Ok(_) => match url {
            Some(url) => format!("git clone of {url}"),
            None => "local git repository".to_string(),
        },
        Err(e) if url.is_none() => {
            warn!("git unavailable, using a plain directory: {:#}", e);
            std::fs::create_dir_all(&paths.repository_dir).with_context(|| {
                format!("Failed to create {}", paths.repository_dir.display())
            })?;
            "plain directory".to_string()
        }
        Err(e) => return Err(e.context("Failed to set up the review repository")),
    };

    // Written last: a home only counts as set up once everything above worked
    config.save_to_path(&paths.config_file)?;
    debug!("Setup complete at {}", paths.root.display());

    println!("✅ Vouch is set up in {}", paths.root.display());
    println!("   Author key:  {}", key.public_hex());
    println!(
        "   Repository:  {} ({repository_kind})",
        paths.repository_dir.display()
    );
    println!();
    println!("   Next: vouch extension add <command>   # e.g. vouch-extension-npm");
    Ok(())
}
