//! `ttp-harness run`: one conformance run between this node and a peer.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use ipnetwork::Ipv4Network;
use tracing::info;
use ttp_core::{MacAddr, Orchestrator, Outcome, RunOptions};

/// Arguments for the run command.
#[derive(Debug, Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunArgs {
    /// Peer node: 1-3 hex groups, e.g. `a` or `00:00:0a`.
    #[arg(long, short = 't')]
    pub target: Option<String>,

    /// Local TTP device (default: vleth, or vlip4 with --ipv4).
    #[arg(long)]
    pub self_dev: Option<String>,

    /// Peer TTP device (default: vleth, or vlip4 with --ipv4).
    #[arg(long)]
    pub peer_dev: Option<String>,

    /// Virtual channel (0, 1 or 2).
    #[arg(long)]
    pub vci: Option<u8>,

    /// Route through the zone gateway.
    #[arg(long)]
    pub use_gw: bool,

    /// Encapsulate in IPv4.
    #[arg(long)]
    pub ipv4: bool,

    /// IPv4 routing prefix for both nodes.
    #[arg(long)]
    pub prefix: Option<Ipv4Network>,

    /// IPv4 routing prefix for this node.
    #[arg(long)]
    pub self_prefix: Option<Ipv4Network>,

    /// IPv4 routing prefix for the peer.
    #[arg(long)]
    pub peer_prefix: Option<Ipv4Network>,

    /// Static next-hop MAC for this node.
    #[arg(long)]
    pub self_nhmac: Option<MacAddr>,

    /// Static next-hop MAC for the peer.
    #[arg(long)]
    pub peer_nhmac: Option<MacAddr>,

    /// Drop this percentage of frames in the module.
    #[arg(long)]
    pub drop_pct: Option<u8>,

    /// Extra settle time after cross-node steps, in seconds.
    #[arg(long)]
    pub sleep: Option<f64>,

    /// Leave the modules loaded after the run.
    #[arg(long)]
    pub no_unload: bool,

    /// Use the modules already loaded.
    #[arg(long)]
    pub no_load: bool,

    /// Skip the traffic scenarios.
    #[arg(long)]
    pub no_traffic: bool,

    /// Repetitions of the medium traffic scenario (disables bulk traffic).
    #[arg(long, allow_negative_numbers = true)]
    pub traffic: Option<i64>,

    /// Skip the packet generator scenarios.
    #[arg(long)]
    pub no_packet: bool,

    /// Run without a peer node.
    #[arg(long)]
    pub no_remote: bool,

    /// Increase verbosity (module and log output).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl From<RunArgs> for RunOptions {
    fn from(args: RunArgs) -> Self {
        Self {
            self_dev: args.self_dev,
            peer_dev: args.peer_dev,
            vci: args.vci,
            use_gw: args.use_gw,
            ipv4: args.ipv4,
            prefix: args.prefix,
            self_prefix: args.self_prefix,
            peer_prefix: args.peer_prefix,
            self_nhmac: args.self_nhmac,
            peer_nhmac: args.peer_nhmac,
            target: args.target,
            drop_pct: args.drop_pct,
            sleep: args.sleep,
            no_unload: args.no_unload,
            no_load: args.no_load,
            no_traffic: args.no_traffic,
            traffic: args.traffic,
            no_packet: args.no_packet,
            no_remote: args.no_remote,
            verbose: args.verbose.min(3),
        }
    }
}

/// Executes the run command.
pub async fn execute(args: RunArgs, config: Option<&Path>) -> Result<ExitCode> {
    let ctx = RunOptions::from(args)
        .validate()
        .context("Invalid options")?;
    let config = super::load_config(config)?;

    info!(peer = %ctx.target, encap = %ctx.encap, "starting run");
    let report = Orchestrator::from_config(config)
        .run(ctx)
        .await
        .context("Setup failed")?;

    for scenario in &report.scenarios {
        match &scenario.outcome {
            Outcome::Passed => println!("PASS  {}.{}", scenario.group, scenario.name),
            Outcome::Failed(reason) => {
                println!("FAIL  {}.{}: {reason}", scenario.group, scenario.name);
            }
            Outcome::Skipped(reason) => {
                println!("SKIP  {}.{} ({reason})", scenario.group, scenario.name);
            }
        }
    }
    println!("{report}");

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
