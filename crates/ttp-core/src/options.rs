//! Run options and the validated run context.
//!
//! [`RunOptions`] mirrors the command line. [`RunOptions::validate`] checks
//! every contradictory or incomplete combination before any side effect and
//! produces an immutable [`RunContext`] that every component reads from.

use std::fmt;
use std::time::Duration;

use ipnetwork::Ipv4Network;

use crate::error::{HarnessError, Result};
use crate::identity::{MacAddr, TargetSpec};

/// Default device in native (Ethernet) mode.
pub const DEFAULT_ETH_DEVICE: &str = "vleth";
/// Default device in IPv4 mode.
pub const DEFAULT_IPV4_DEVICE: &str = "vlip4";
/// Default IPv4 routing prefix.
pub const DEFAULT_IPV4_PREFIX: &str = "10.0.0.0/8";
/// Settle delay applied when packets are dropped on purpose.
pub const DROP_SETTLE: Duration = Duration::from_secs(2);
/// Repetitions of the medium traffic scenario.
pub const DEFAULT_TRAFFIC_REPS: u32 = 10;

/// Protocol encapsulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encap {
    /// Raw Ethernet frames (etype 0x9ac6).
    #[default]
    Native,
    /// IPv4 encapsulation (etype 0x0800).
    Ipv4,
}

impl Encap {
    /// Returns true for IPv4 encapsulation.
    #[must_use]
    pub const fn is_ipv4(self) -> bool {
        matches!(self, Self::Ipv4)
    }
}

impl fmt::Display for Encap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("ttpoe (etype: 0x9ac6)"),
            Self::Ipv4 => f.write_str("ipv4 (etype: 0x0800)"),
        }
    }
}

/// Virtual-channel identifier (0, 1 or 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Vci(u8);

impl Vci {
    /// Highest valid channel.
    pub const MAX: u8 = 2;

    /// Creates a channel identifier.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for values above [`Vci::MAX`].
    pub fn new(value: u8) -> Result<Self> {
        if value > Self::MAX {
            return Err(HarnessError::config(format!("invalid vci {value}")));
        }
        Ok(Self(value))
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Returns true for the module default (0).
    #[must_use]
    pub const fn is_default(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Vci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw options as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Local TTP device override.
    pub self_dev: Option<String>,
    /// Peer TTP device override.
    pub peer_dev: Option<String>,
    /// Virtual channel override.
    pub vci: Option<u8>,
    /// Route through a gateway (native mode only).
    pub use_gw: bool,
    /// IPv4 encapsulation.
    pub ipv4: bool,
    /// Prefix for both nodes.
    pub prefix: Option<Ipv4Network>,
    /// Prefix for the local node.
    pub self_prefix: Option<Ipv4Network>,
    /// Prefix for the peer node.
    pub peer_prefix: Option<Ipv4Network>,
    /// Static next hop for the local node.
    pub self_nhmac: Option<MacAddr>,
    /// Static next hop for the peer node.
    pub peer_nhmac: Option<MacAddr>,
    /// Peer target specifier (mandatory).
    pub target: Option<String>,
    /// Fault-injection drop percentage.
    pub drop_pct: Option<u8>,
    /// Settle delay override in seconds.
    pub sleep: Option<f64>,
    /// Keep modules loaded after the run.
    pub no_unload: bool,
    /// Use already-loaded modules.
    pub no_load: bool,
    /// Skip traffic scenarios.
    pub no_traffic: bool,
    /// Repetitions of the medium traffic scenario.
    pub traffic: Option<i64>,
    /// Skip packet-generator scenarios.
    pub no_packet: bool,
    /// Run without a peer node.
    pub no_remote: bool,
    /// Verbosity level (0-3), forwarded to the module.
    pub verbose: u8,
}

/// Per-node settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    /// TTP device name.
    pub device: String,
    /// IPv4 routing prefix (IPv4 mode only).
    pub prefix: Option<Ipv4Network>,
    /// Static next hop (IPv4 mode only).
    pub nhmac: Option<MacAddr>,
}

/// Parts of the run the user turned off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SkipFlags {
    /// Do not (re)load modules during setup.
    pub load: bool,
    /// Do not unload modules during teardown.
    pub unload: bool,
    /// Skip packet-generator scenarios.
    pub packet: bool,
    /// Skip traffic scenarios.
    pub traffic: bool,
    /// No peer node.
    pub remote: bool,
}

/// Immutable, validated description of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Peer target.
    pub target: TargetSpec,
    /// Encapsulation mode.
    pub encap: Encap,
    /// Gateway routing (native mode).
    pub use_gateway: bool,
    /// Virtual channel.
    pub vci: Vci,
    /// Fault-injection drop percentage.
    pub drop_pct: u8,
    /// Extra settle delay after cross-node steps.
    pub settle: Duration,
    /// Verbosity level.
    pub verbose: u8,
    /// Local node settings.
    pub local: NodeSettings,
    /// Peer node settings.
    pub peer: NodeSettings,
    /// Skipped parts.
    pub skip: SkipFlags,
    /// Medium traffic repetitions; `Some` also suppresses the bulk loops.
    pub traffic_reps: Option<u32>,
}

impl RunOptions {
    /// Validates the options and builds the run context.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing or malformed target,
    /// contradictory flags, an invalid vci, drop percentage or sleep value.
    pub fn validate(self) -> Result<RunContext> {
        let target = self
            .target
            .as_deref()
            .ok_or_else(|| HarnessError::config("missing --target"))?;
        let target = TargetSpec::parse(target)?;

        if self.ipv4 && self.use_gw {
            return Err(HarnessError::config(
                "cannot combine option '--use-gw' with '--ipv4'",
            ));
        }
        let any_prefix =
            self.prefix.is_some() || self.self_prefix.is_some() || self.peer_prefix.is_some();
        if !self.ipv4 && any_prefix {
            return Err(HarnessError::config(
                "option '--prefix' requires '--ipv4'",
            ));
        }
        if self.prefix.is_some() && (self.self_prefix.is_some() || self.peer_prefix.is_some()) {
            return Err(HarnessError::config(
                "cannot specify '--self/peer-prefix' with '--prefix'",
            ));
        }
        if !self.ipv4 && (self.self_nhmac.is_some() || self.peer_nhmac.is_some()) {
            return Err(HarnessError::config("option '--nhmac' requires '--ipv4'"));
        }
        if self.self_prefix.is_some() != self.peer_prefix.is_some() {
            return Err(HarnessError::config(
                "require both '--self-prefix' and '--peer-prefix'",
            ));
        }
        if self.self_nhmac.is_some() != self.peer_nhmac.is_some() {
            return Err(HarnessError::config(
                "require both '--self-nhmac' and '--peer-nhmac'",
            ));
        }

        let vci = Vci::new(self.vci.unwrap_or(0))?;

        let drop_pct = self.drop_pct.unwrap_or(0);
        if drop_pct > 100 {
            return Err(HarnessError::config(format!(
                "invalid drop percentage {drop_pct}"
            )));
        }

        let settle = match self.sleep {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|_| HarnessError::config(format!("invalid --sleep={secs}")))?,
            None if drop_pct > 0 => DROP_SETTLE,
            None => Duration::ZERO,
        };

        let encap = if self.ipv4 { Encap::Ipv4 } else { Encap::Native };
        let default_device = match encap {
            Encap::Native => DEFAULT_ETH_DEVICE,
            Encap::Ipv4 => DEFAULT_IPV4_DEVICE,
        };

        let (self_prefix, peer_prefix) = match encap {
            Encap::Native => (None, None),
            Encap::Ipv4 => {
                let default: Ipv4Network = DEFAULT_IPV4_PREFIX
                    .parse()
                    .map_err(|e| HarnessError::config(format!("default prefix: {e}")))?;
                match (self.prefix, self.self_prefix, self.peer_prefix) {
                    (Some(both), _, _) => (Some(both), Some(both)),
                    (None, Some(local), Some(peer)) => (Some(local), Some(peer)),
                    _ => (Some(default), Some(default)),
                }
            }
        };

        let traffic_reps = self.traffic.map(|reps| {
            u32::try_from(reps)
                .ok()
                .filter(|r| *r <= DEFAULT_TRAFFIC_REPS)
                .unwrap_or(DEFAULT_TRAFFIC_REPS)
        });

        Ok(RunContext {
            target,
            encap,
            use_gateway: self.use_gw,
            vci,
            drop_pct,
            settle,
            verbose: self.verbose,
            local: NodeSettings {
                device: self.self_dev.unwrap_or_else(|| default_device.to_string()),
                prefix: self_prefix,
                nhmac: self.self_nhmac,
            },
            peer: NodeSettings {
                device: self.peer_dev.unwrap_or_else(|| default_device.to_string()),
                prefix: peer_prefix,
                nhmac: self.peer_nhmac,
            },
            skip: SkipFlags {
                load: self.no_load,
                unload: self.no_unload,
                packet: self.no_packet,
                traffic: self.no_traffic,
                remote: self.no_remote,
            },
            traffic_reps,
        })
    }
}

impl RunContext {
    /// Returns true when next-hop resolution must run after module load.
    #[must_use]
    pub const fn resolves_next_hop(&self) -> bool {
        self.use_gateway || self.encap.is_ipv4()
    }
}
