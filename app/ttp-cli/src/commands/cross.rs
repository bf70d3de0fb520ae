//! `ttp-harness cross`: randomized cross-zone pairs across the lab.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use rand::SeedableRng;
use rand::rngs::StdRng;
use ttp_core::cross::{CrossOptions, CrossRunner, CrossSettings};
use ttp_core::{ShellExecutor, TokioSleeper};

/// Arguments for the cross command.
#[derive(Debug, Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct CrossArgs {
    /// Include every optional node and run five rounds.
    #[arg(long, short = 'a')]
    pub all: bool,

    /// Print the plan without running anything.
    #[arg(long, short = 'd')]
    pub dry_run: bool,

    /// Use IPv4 encapsulation instead of the gateway.
    #[arg(long, short = 'i')]
    pub ipv4: bool,

    /// Only run the sequence id scenarios on each pair.
    #[arg(long, short = 'm')]
    pub min: bool,

    /// Number of rounds.
    #[arg(long, short = 'n')]
    pub num: Option<u32>,

    /// Only print failed pairs.
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Run the pairs of a round one after another.
    #[arg(long, short = 's')]
    pub serial: bool,

    /// Add the uba nodes to the zones.
    #[arg(long, short = 'b')]
    pub uba: bool,

    /// Add the utm zone.
    #[arg(long, short = 'u')]
    pub utm: bool,

    /// Seconds to wait between rounds.
    #[arg(long, short = 'w')]
    pub wait: Option<u64>,

    /// Increase log verbosity.
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl From<&CrossArgs> for CrossOptions {
    fn from(args: &CrossArgs) -> Self {
        Self {
            all: args.all,
            dry_run: args.dry_run,
            ipv4: args.ipv4,
            min: args.min,
            num: args.num,
            serial: args.serial,
            uba: args.uba,
            utm: args.utm,
            wait: args.wait.map(Duration::from_secs),
        }
    }
}

/// Executes the cross command.
pub async fn execute(args: CrossArgs, config: Option<&Path>) -> Result<ExitCode> {
    let config = super::load_config(config)?;
    let settings = CrossSettings::from(&CrossOptions::from(&args));
    let runner = CrossRunner::new(
        Arc::new(ShellExecutor::new(config.ssh.clone())),
        Arc::new(TokioSleeper),
        Arc::new(config),
        settings,
    );

    let rounds = runner
        .run(&mut StdRng::from_entropy())
        .await
        .context("Failed to plan node pairs")?;

    let mut failed = 0;
    for round in &rounds {
        if !args.quiet {
            println!("round {}", round.round);
        }
        for result in &round.results {
            match result.passed {
                None => println!("  {}  {}", result.pair, runner.pair_script(&result.pair)),
                Some(true) if !args.quiet => println!("  PASS  {}", result.pair),
                Some(true) => {}
                Some(false) => println!("  FAIL  {}", result.pair),
            }
        }
        failed += round.failed();
    }

    if !args.quiet && !args.dry_run {
        let total: usize = rounds.iter().map(|r| r.results.len()).sum();
        println!("{} of {total} pairs passed", total - failed);
    }

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
