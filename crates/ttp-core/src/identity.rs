//! Node identity resolution.
//!
//! Derives the hardware address, optional IPv4 address and target code of
//! the local node from its TTP device, and the same identity for the peer
//! from the user's `--target` specifier.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::Deserialize;
use tracing::{debug, info};

use crate::cross::Zones;
use crate::error::{HarnessError, Result};
use crate::exec::{Executor, Host};
use crate::options::{Encap, RunContext};

/// Vendor OUI carried by every TTP device in native mode.
pub const TTP_OUI: [u8; 3] = [0x98, 0xed, 0x5c];

/// A 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The all-zero address, used by the module as "not resolved".
    pub const ZERO: Self = Self([0; 6]);

    /// Builds an address from the TTP OUI and three low-order octets.
    #[must_use]
    pub const fn from_ttp_suffix(low: [u8; 3]) -> Self {
        Self([
            TTP_OUI[0], TTP_OUI[1], TTP_OUI[2], low[0], low[1], low[2],
        ])
    }

    /// Returns true for the all-zero sentinel.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Returns true when the address carries the TTP OUI.
    #[must_use]
    pub fn has_ttp_oui(&self) -> bool {
        self.0[..3] == TTP_OUI
    }

    /// Returns the three low-order octets.
    #[must_use]
    pub const fn low_octets(&self) -> [u8; 3] {
        [self.0[3], self.0[4], self.0[5]]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let mut octets = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count == 6 || !is_hex_group(part) {
                return Err(HarnessError::parse(format!("invalid MAC address '{s}'")));
            }
            octets[count] = u8::from_str_radix(part, 16)
                .map_err(|_| HarnessError::parse(format!("invalid MAC address '{s}'")))?;
            count += 1;
        }
        if count != 6 {
            return Err(HarnessError::parse(format!("invalid MAC address '{s}'")));
        }
        Ok(Self(octets))
    }
}

/// One or two hex digits.
fn is_hex_group(group: &str) -> bool {
    (1..=2).contains(&group.len()) && group.bytes().all(|b| b.is_ascii_hexdigit())
}

/// A normalized `--target` specifier.
///
/// One to three hex groups; missing groups are zero-filled on the left, so
/// `a` and `00:00:0a` name the same peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetSpec {
    octets: [u8; 3],
}

impl TargetSpec {
    /// Parses a target specifier.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for anything other than 1-3 groups of
    /// 1-2 hex digits.
    pub fn parse(spec: &str) -> Result<Self> {
        let bad = || HarnessError::config(format!("bad --target='{spec}'"));
        let groups: Vec<&str> = spec.trim().split(':').collect();
        if groups.is_empty() || groups.len() > 3 {
            return Err(bad());
        }

        let mut octets = [0u8; 3];
        let offset = 3 - groups.len();
        for (i, group) in groups.iter().enumerate() {
            if !is_hex_group(group) {
                return Err(bad());
            }
            octets[offset + i] = u8::from_str_radix(group, 16).map_err(|_| bad())?;
        }
        Ok(Self { octets })
    }

    /// Returns the three low-order address octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 3] {
        self.octets
    }

    /// Colon-joined low-order fragment, e.g. `00:00:0a`.
    #[must_use]
    pub fn mac_fragment(&self) -> String {
        let [a, b, c] = self.octets;
        format!("{a:02x}:{b:02x}:{c:02x}")
    }

    /// Six-digit hex target code, e.g. `00000a`.
    #[must_use]
    pub fn target_code(&self) -> String {
        let [a, b, c] = self.octets;
        format!("{a:02x}{b:02x}{c:02x}")
    }

    /// Full peer hardware address under the TTP OUI.
    #[must_use]
    pub const fn mac(&self) -> MacAddr {
        MacAddr::from_ttp_suffix(self.octets)
    }

    /// Peer hostname by lab naming convention.
    ///
    /// Only fragments with a zero upper prefix map to a `node-NN` name.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnresolvedPeer`] for any other fragment.
    pub fn hostname(&self) -> Result<String> {
        match self.octets {
            [0, 0, low] => Ok(format!("node-{low:02x}")),
            _ => Err(HarnessError::UnresolvedPeer(format!(
                "no hostname for target {}",
                self.mac_fragment()
            ))),
        }
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mac_fragment())
    }
}

/// Resolved identity of one node. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Hostname used for locks and ssh.
    pub hostname: String,
    /// Hardware address of the TTP device.
    pub mac: MacAddr,
    /// IPv4 address, only known for the local node in IPv4 mode.
    pub ipv4: Option<Ipv4Addr>,
    /// Six-digit hex target code other nodes use to address this one.
    pub target_code: String,
}

impl NodeIdentity {
    /// Low-order address fragment as shown in tag tables.
    #[must_use]
    pub fn mac_fragment(&self) -> String {
        let [a, b, c] = self.mac.low_octets();
        format!("{a:02x}:{b:02x}:{c:02x}")
    }
}

/// Both identities of a run.
#[derive(Debug, Clone)]
pub struct Identities {
    /// The local node.
    pub local: NodeIdentity,
    /// The peer; `None` with `--no-remote`.
    pub peer: Option<NodeIdentity>,
    /// Peer fragment, known even without a remote peer.
    pub target: TargetSpec,
}

impl Identities {
    /// Host handle for the peer, if there is one.
    #[must_use]
    pub fn peer_host(&self) -> Option<Host> {
        self.peer.as_ref().map(|p| Host::Remote(p.hostname.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct IpLink {
    address: String,
}

#[derive(Debug, Deserialize)]
struct IpAddrEntry {
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    local: String,
}

/// Extracts the link-layer address from `ip -j link show` output.
pub(crate) fn parse_link_json(json: &str) -> Result<MacAddr> {
    let links: Vec<IpLink> = serde_json::from_str(json)
        .map_err(|e| HarnessError::parse(format!("ip link output: {e}")))?;
    let link = links
        .first()
        .ok_or_else(|| HarnessError::parse("ip link output has no entries"))?;
    link.address.parse()
}

/// Extracts the first IPv4 address from `ip -j -4 addr show` output.
pub(crate) fn parse_addr_json(json: &str) -> Result<Ipv4Addr> {
    let entries: Vec<IpAddrEntry> = serde_json::from_str(json)
        .map_err(|e| HarnessError::parse(format!("ip addr output: {e}")))?;
    let local = entries
        .first()
        .and_then(|e| e.addr_info.first())
        .ok_or_else(|| HarnessError::parse("ip addr output has no IPv4 address"))?;
    local
        .local
        .parse()
        .map_err(|e| HarnessError::parse(format!("invalid IPv4 address '{}': {e}", local.local)))
}

/// Host number encoded as the hex suffix of a `node-NN` hostname.
fn host_number(hostname: &str) -> Option<u8> {
    let suffix = hostname.rsplit('-').next()?;
    u8::from_str_radix(suffix, 16).ok()
}

/// Rejects gateway runs between two nodes of the same zone.
///
/// # Errors
///
/// Returns a configuration error when both nodes share a zone.
pub fn check_gateway_zones(local_hostname: &str, target: &TargetSpec) -> Result<()> {
    let Some(local) = host_number(local_hostname) else {
        return Ok(());
    };
    let peer = target.octets()[2];
    let zones = Zones::build(true, true);
    match (zones.zone_of(local), zones.zone_of(peer)) {
        (Some(a), Some(b)) if a == b => Err(HarnessError::config(format!(
            "unsupported with --use-gw: target {peer:02x} and local node {local:02x} share zone {}",
            a + 1
        ))),
        _ => Ok(()),
    }
}

/// Resolves node identities through an [`Executor`].
pub struct IdentityResolver<'a> {
    exec: &'a dyn Executor,
}

impl<'a> IdentityResolver<'a> {
    /// Creates a resolver.
    #[must_use]
    pub fn new(exec: &'a dyn Executor) -> Self {
        Self { exec }
    }

    /// Reads the local hostname.
    pub async fn local_hostname(&self) -> Result<String> {
        let out = self.exec.run_checked(&Host::Local, "uname -n").await?;
        Ok(out.trim().to_string())
    }

    /// Resolves the local identity from its TTP device.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the device cannot be queried, or
    /// in native mode when it does not carry the TTP OUI.
    pub async fn resolve_local(&self, hostname: &str, device: &str, encap: Encap) -> Result<NodeIdentity> {
        let cmd = format!("ip -j link show dev {device}");
        let json = self
            .exec
            .run_checked(&Host::Local, &cmd)
            .await
            .map_err(|e| HarnessError::config(format!("{cmd} failed: {e}")))?;
        let mac = parse_link_json(&json)?;
        debug!(device, %mac, "local device address");

        let (ipv4, target_code) = match encap {
            Encap::Ipv4 => {
                let cmd = format!("ip -j -4 addr show dev {device}");
                let json = self
                    .exec
                    .run_checked(&Host::Local, &cmd)
                    .await
                    .map_err(|e| HarnessError::config(format!("{cmd} failed: {e}")))?;
                let ip = parse_addr_json(&json)?;
                (Some(ip), format!("{:06x}", ip.octets()[3]))
            }
            Encap::Native => {
                if !mac.has_ttp_oui() {
                    return Err(HarnessError::config(format!(
                        "'{device}' is not a TTP device: {mac}"
                    )));
                }
                let [a, b, c] = mac.low_octets();
                (None, format!("{a:02x}{b:02x}{c:02x}"))
            }
        };

        Ok(NodeIdentity {
            hostname: hostname.to_string(),
            mac,
            ipv4,
            target_code,
        })
    }

    /// Resolves both identities for a run.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error on self-targeting or a same-zone
    /// gateway run, and with [`HarnessError::UnresolvedPeer`] when the peer
    /// has no hostname.
    pub async fn resolve(&self, ctx: &RunContext) -> Result<Identities> {
        let hostname = self.local_hostname().await?;
        if ctx.use_gateway {
            check_gateway_zones(&hostname, &ctx.target)?;
        }

        let local = self
            .resolve_local(&hostname, &ctx.local.device, ctx.encap)
            .await?;

        let peer = if ctx.skip.remote {
            info!("--no-remote: no peer node");
            None
        } else {
            Some(NodeIdentity {
                hostname: ctx.target.hostname()?,
                mac: ctx.target.mac(),
                ipv4: None,
                target_code: ctx.target.target_code(),
            })
        };

        if let Some(peer) = &peer {
            if peer.hostname == local.hostname || peer.mac == local.mac {
                return Err(HarnessError::config(format!(
                    "--target='{}' names the local node",
                    ctx.target
                )));
            }
        }

        Ok(Identities {
            local,
            peer,
            target: ctx.target,
        })
    }
}
