//! Extension management: add, list, remove

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use vouch_core::config::ExtensionConfig;
use vouch_core::extension::{self, ExtensionClient};

use crate::workspace::Workspace;

#[derive(Parser, Debug)]
pub enum ExtensionCommand {
    /// Register an extension after a successful handshake
    Add {
        /// Program implementing the extension protocol
        command: String,

        /// Arguments passed to the program
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Per-call time budget in seconds
        #[clap(long, default_value_t = 10)]
        timeout: u64,
    },

    /// List registered extensions
    List {
        /// Start each extension and report its handshake
        #[clap(long)]
        probe: bool,
    },

    /// Remove the extension for an ecosystem
    Remove {
        /// Ecosystem id, e.g. "npm"
        ecosystem: String,
    },
}

impl ExtensionCommand {
    pub async fn execute(self, home: Option<PathBuf>) -> Result<()> {
        let mut workspace = Workspace::open(home)?;
        match self {
            ExtensionCommand::Add {
                command,
                args,
                timeout,
            } => extension_add(&mut workspace, command, args, timeout).await,
            ExtensionCommand::List { probe } => extension_list(&workspace, probe).await,
            ExtensionCommand::Remove { ecosystem } => extension_remove(&mut workspace, &ecosystem),
        }
    }
}

async fn extension_add(
    workspace: &mut Workspace,
    command: String,
    args: Vec<String>,
    timeout: u64,
) -> Result<()> {
    if timeout == 0 {
        bail!("--timeout must be at least 1 second");
    }
    let spawn = extension::ExtensionCommand::new(command.clone(), args.clone());
    println!("🔌 Starting {spawn} ...");

    let client = ExtensionClient::start(spawn, Duration::from_secs(timeout)).await?;
    let descriptor = client.descriptor().clone();
    client.shutdown().await;

    let replaced = workspace.config.extension(&descriptor.ecosystem_id).is_some();
    workspace.config.upsert_extension(ExtensionConfig {
        name: descriptor.ecosystem_id.clone(),
        command,
        args,
        timeout_seconds: timeout,
    });
    workspace.save_config()?;

    let verb = if replaced { "Replaced" } else { "Registered" };
    println!(
        "✅ {verb} extension for ecosystem '{}'",
        descriptor.ecosystem_id
    );
    println!("   Manifests:    {}", join(&descriptor.manifest_patterns));
    println!("   Capabilities: {}", join(&descriptor.capabilities));
    Ok(())
}

#[derive(Tabled)]
struct ExtensionRow {
    #[tabled(rename = "Ecosystem")]
    ecosystem: String,
    #[tabled(rename = "Command")]
    command: String,
    #[tabled(rename = "Timeout")]
    timeout: String,
    #[tabled(rename = "Status")]
    status: String,
}

async fn extension_list(workspace: &Workspace, probe: bool) -> Result<()> {
    if workspace.config.extensions.is_empty() {
        println!("No extensions registered.");
        println!("   Add one with: vouch extension add <command> [args...]");
        return Ok(());
    }

    let mut rows = Vec::new();
    for extension in &workspace.config.extensions {
        let status = if probe {
            match ExtensionClient::start(extension.command(), extension.timeout()).await {
                Ok(client) => {
                    let status = format!("ok ({})", join(&client.descriptor().capabilities));
                    client.shutdown().await;
                    status
                }
                Err(e) => format!("failed: {e}"),
            }
        } else {
            "-".to_string()
        };
        rows.push(ExtensionRow {
            ecosystem: extension.name.clone(),
            command: extension.command().to_string(),
            timeout: format!("{}s", extension.timeout_seconds),
            status,
        });
    }

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
    Ok(())
}

fn extension_remove(workspace: &mut Workspace, ecosystem: &str) -> Result<()> {
    if !workspace.config.remove_extension(ecosystem) {
        bail!("No extension registered for ecosystem '{ecosystem}'");
    }
    workspace.save_config()?;
    println!("✅ Removed extension for ecosystem '{ecosystem}'");
    Ok(())
}

fn join<'a>(items: impl IntoIterator<Item = &'a String>) -> String {
    items
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
