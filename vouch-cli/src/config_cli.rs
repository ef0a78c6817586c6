//! `vouch config get/set`

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::workspace::Workspace;

#[derive(Parser, Debug)]
pub enum ConfigCommand {
    /// Print a setting, e.g. `check.thresholds.trusted`
    Get { name: String },

    /// Change a setting
    Set { name: String, value: String },
}

impl ConfigCommand {
    pub async fn execute(self, home: Option<PathBuf>) -> Result<()> {
        let mut workspace = Workspace::open(home)?;
        match self {
            ConfigCommand::Get { name } => {
                println!("{}", workspace.config.get(&name)?);
            }
            ConfigCommand::Set { name, value } => {
                workspace.config.set(&name, &value)?;
                workspace.save_config()?;
                println!("{name} = {}", workspace.config.get(&name)?);
            }
        }
        Ok(())
    }
}
