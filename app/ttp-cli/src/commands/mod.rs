//! CLI command implementations.
//!
//! - `run`: one harness run between this node and a peer
//! - `cross`: randomized cross-zone rounds over the lab

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ttp_core::HarnessConfig;

pub mod cross;
pub mod run;

/// TTP-over-Ethernet conformance harness
#[derive(Parser)]
#[command(name = "ttp-harness")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Harness settings file (overrides the system and user files)
    #[arg(long, global = true, env = "TTP_HARNESS_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Log verbosity requested by the subcommand.
    pub const fn verbosity(&self) -> u8 {
        match &self.command {
            Commands::Run(args) => args.verbose,
            Commands::Cross(args) => args.verbose,
        }
    }
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the conformance scenarios against a peer
    Run(run::RunArgs),

    /// Run cross-zone pairs across the lab
    Cross(cross::CrossArgs),
}

/// Loads harness settings, from `path` when given.
pub fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::load_from(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => HarnessConfig::load().context("Failed to load harness settings"),
    }
}
