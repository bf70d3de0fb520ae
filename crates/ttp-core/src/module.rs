//! Protocol module lifecycle on a node.
//!
//! Loading is a single parameterized `insmod`; everything after that is
//! writes and reads of files under the module parameter directory. The
//! module re-derives routing state whenever `target` is written, so the
//! order of `vci`, `target` and next-hop resolution matters.

use std::sync::Arc;

use ipnetwork::Ipv4Network;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::exec::{Executor, Host};
use crate::identity::MacAddr;
use crate::options::{Encap, NodeSettings, RunContext, Vci};
use crate::retry::{Polled, RetryPolicy, Sleeper};

/// Parameter file names exposed by the module.
pub mod params {
    /// Hex target code of the peer.
    pub const TARGET: &str = "target";
    /// Virtual channel.
    pub const VCI: &str = "vci";
    /// Next-hop / gateway hardware address.
    pub const NHMAC: &str = "nhmac";
    /// Enables gateway routing in native mode.
    pub const USE_GW: &str = "use_gw";
    /// IPv4 routing prefix.
    pub const PREFIX: &str = "prefix";
    /// Local IPv4 address picked by the module.
    pub const IPV4_SIP: &str = "ipv4_sip";
    /// Peer IPv4 address derived from the target.
    pub const IPV4_DIP: &str = "ipv4_dip";
    /// Free-text counters.
    pub const STATS: &str = "stats";
    /// Decimal tag sequence baseline.
    pub const TAG_SEQ: &str = "tag_seq";
}

/// Activation parameters for one node. Rendered verbatim into `insmod`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Network device the module binds to.
    pub device: String,
    /// Module log verbosity.
    pub verbose: u8,
    /// Fault-injection drop percentage.
    pub drop_pct: u8,
    /// Encapsulation mode.
    pub encap: Encap,
    /// IPv4 routing prefix.
    pub prefix: Option<Ipv4Network>,
    /// Static next hop.
    pub nhmac: Option<MacAddr>,
    /// Virtual channel, applied after load.
    pub vci: Vci,
}

impl ModuleConfig {
    /// Builds the configuration of one node from the run context.
    #[must_use]
    pub fn for_node(ctx: &RunContext, node: &NodeSettings) -> Self {
        Self {
            device: node.device.clone(),
            verbose: ctx.verbose,
            drop_pct: ctx.drop_pct,
            encap: ctx.encap,
            prefix: node.prefix,
            nhmac: node.nhmac,
            vci: ctx.vci,
        }
    }

    /// Module arguments in `key=value` form.
    #[must_use]
    pub fn insmod_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("verbose={}", self.verbose),
            format!("dev={}", self.device),
            format!("drop_pct={}", self.drop_pct),
        ];
        if self.encap.is_ipv4() {
            args.push("ipv4=1".to_string());
            if let Some(prefix) = self.prefix {
                args.push(format!("prefix={prefix}"));
            }
            if let Some(nhmac) = self.nhmac {
                args.push(format!("nhmac={nhmac}"));
            }
        }
        args
    }
}

/// A next hop published by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedGateway {
    /// Next-hop hardware address (never the zero sentinel).
    pub nhmac: MacAddr,
    /// Probes it took to resolve.
    pub attempts: u32,
}

/// Loads, configures and unloads the module on a node.
#[derive(Clone)]
pub struct ModuleLifecycle {
    exec: Arc<dyn Executor>,
    sleeper: Arc<dyn Sleeper>,
    config: Arc<HarnessConfig>,
}

impl ModuleLifecycle {
    /// Creates a lifecycle manager.
    #[must_use]
    pub fn new(
        exec: Arc<dyn Executor>,
        sleeper: Arc<dyn Sleeper>,
        config: Arc<HarnessConfig>,
    ) -> Self {
        Self {
            exec,
            sleeper,
            config,
        }
    }

    /// Loads the module on `host`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ModuleLoad`] if `insmod` fails.
    pub async fn load(&self, host: &Host, module: &ModuleConfig) -> Result<()> {
        let script = format!(
            "sudo insmod {} {}",
            self.config.module_path,
            module.insmod_args().join(" ")
        );
        info!(%host, device = %module.device, encap = %module.encap, "loading module");

        let output = self.exec.run(host, &script).await?;
        if !output.success() {
            return Err(HarnessError::ModuleLoad {
                node: host.to_string(),
                reason: non_empty(output.stderr.trim(), "insmod failed"),
            });
        }
        Ok(())
    }

    /// Unloads the module. Best effort: failures are logged, never returned.
    pub async fn unload(&self, host: &Host) {
        let script = format!("sudo rmmod {}", self.config.module_name);
        match self.exec.run(host, &script).await {
            Ok(output) if output.success() => info!(%host, "module unloaded"),
            Ok(output) => {
                warn!(%host, exit_code = output.exit_code, stderr = %output.stderr.trim(), "rmmod failed");
            }
            Err(e) => warn!(%host, error = %e, "rmmod failed"),
        }
    }

    /// Reads a parameter, trimmed.
    pub async fn read_param(&self, host: &Host, name: &str) -> Result<String> {
        let value = self.exec.read_file(host, &self.config.param(name)).await?;
        Ok(value.trim().to_string())
    }

    /// Writes a parameter.
    pub async fn write_param(&self, host: &Host, name: &str, value: &str) -> Result<()> {
        debug!(%host, param = name, value, "set module parameter");
        self.exec
            .write_file(host, &self.config.param(name), value)
            .await
    }

    /// Reads the published next hop.
    pub async fn next_hop(&self, host: &Host) -> Result<MacAddr> {
        self.read_param(host, params::NHMAC).await?.parse()
    }

    /// Points the module at a peer.
    ///
    /// A non-default channel is written first because assigning `target`
    /// builds routing state for the current channel.
    pub async fn set_target(&self, host: &Host, target_code: &str, vci: Vci) -> Result<()> {
        if !vci.is_default() {
            self.write_param(host, params::VCI, &vci.to_string()).await?;
        }
        self.write_param(host, params::TARGET, target_code).await
    }

    /// Polls until the module publishes a non-zero next hop.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Timeout`] once the policy's budget is spent.
    pub async fn resolve_gateway(&self, host: &Host, policy: &RetryPolicy) -> Result<ResolvedGateway> {
        let polled = policy
            .poll(self.sleeper.as_ref(), || async move {
                let nhmac = self.next_hop(host).await?;
                debug!(%host, %nhmac, "next-hop probe");
                Ok((!nhmac.is_zero()).then_some(nhmac))
            })
            .await?;

        match polled {
            Polled::Ready { value, attempts } => {
                info!(%host, nhmac = %value, attempts, "next hop resolved");
                Ok(ResolvedGateway {
                    nhmac: value,
                    attempts,
                })
            }
            Polled::Exhausted { attempts } => Err(HarnessError::timeout(format!(
                "next-hop MAC on {host} not resolved after {attempts} attempts"
            ))),
        }
    }

    /// Enables gateway routing after the gateway MAC is known.
    pub async fn enable_gateway(&self, host: &Host) -> Result<()> {
        self.write_param(host, params::USE_GW, "1").await
    }

    /// Brings the local module from loaded to addressed.
    ///
    /// * native: set vci and target.
    /// * native with gateway: resolve gateway, enable it, then set vci and target.
    /// * IPv4: set vci and target (the next hop is derived from the target's
    ///   address), then wait for the next hop.
    pub async fn configure_local(
        &self,
        host: &Host,
        ctx: &RunContext,
        target_code: &str,
        policy: &RetryPolicy,
    ) -> Result<Option<ResolvedGateway>> {
        match (ctx.encap, ctx.use_gateway) {
            (Encap::Ipv4, _) => {
                self.set_target(host, target_code, ctx.vci).await?;
                self.log_ipv4_params(host).await;
                let gateway = self.resolve_gateway(host, policy).await?;
                Ok(Some(gateway))
            }
            (Encap::Native, true) => {
                let gateway = self.resolve_gateway(host, policy).await?;
                self.enable_gateway(host).await?;
                self.set_target(host, target_code, ctx.vci).await?;
                Ok(Some(gateway))
            }
            (Encap::Native, false) => {
                self.set_target(host, target_code, ctx.vci).await?;
                Ok(None)
            }
        }
    }

    async fn log_ipv4_params(&self, host: &Host) {
        for name in [params::PREFIX, params::IPV4_SIP, params::IPV4_DIP] {
            match self.read_param(host, name).await {
                Ok(value) => info!(%host, param = name, %value, "module parameter"),
                Err(e) => debug!(%host, param = name, error = %e, "parameter unreadable"),
            }
        }
    }
}

fn non_empty(s: &str, fallback: &str) -> String {
    if s.is_empty() {
        fallback.to_string()
    } else {
        s.to_string()
    }
}
