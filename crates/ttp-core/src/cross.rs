//! Randomized cross-zone runs over the whole lab.
//!
//! Nodes are grouped in zones behind different gateways. Each round pairs
//! every node with a partner from another zone and runs the node's harness
//! script against that partner, either all pairs at once or one by one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::exec::{Executor, Host};
use crate::options::Encap;
use crate::retry::Sleeper;

/// Zones every plan includes.
pub const BASE_ZONES: [[u8; 3]; 4] = [
    [0x01, 0x02, 0x03],
    [0x04, 0x05, 0x06],
    [0x07, 0x08, 0x09],
    [0x0a, 0x0b, 0x0c],
];

/// Extra nodes, one appended to each base zone.
pub const UBA_NODES: [u8; 4] = [0x10, 0x11, 0x71, 0x72];

/// Extra zone of its own.
pub const UTM_ZONE: [u8; 4] = [0x21, 0x22, 0x23, 0x24];

/// Nodes that can be targeted but never initiate a run.
const NON_INITIATORS: [u8; 2] = [0x10, 0x11];

/// Shuffles tried before a plan is given up.
const MAX_PLAN_ATTEMPTS: u32 = 1000;

/// Default pause between rounds.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(10);

/// Rounds with `--all`.
const ALL_ROUNDS: u32 = 5;

/// Raw cross-run options, as given on the command line.
#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct CrossOptions {
    /// Extra nodes, extra zone and five rounds.
    pub all: bool,
    /// Plan only; run nothing.
    pub dry_run: bool,
    /// IPv4 encapsulation instead of gateway routing.
    pub ipv4: bool,
    /// Only the sequence id scenarios.
    pub min: bool,
    /// Rounds to run.
    pub num: Option<u32>,
    /// Run pairs one at a time.
    pub serial: bool,
    /// Include the extra per-zone nodes.
    pub uba: bool,
    /// Include the extra zone.
    pub utm: bool,
    /// Pause between rounds.
    pub wait: Option<Duration>,
}

/// Node groups; partners always come from different groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zones(Vec<Vec<u8>>);

impl Zones {
    /// Builds the zone list.
    #[must_use]
    pub fn build(uba: bool, utm: bool) -> Self {
        let mut zones: Vec<Vec<u8>> = BASE_ZONES.iter().map(|z| z.to_vec()).collect();
        if uba {
            for (zone, node) in zones.iter_mut().zip(UBA_NODES) {
                zone.push(node);
            }
        }
        if utm {
            zones.push(UTM_ZONE.to_vec());
        }
        Self(zones)
    }

    /// Number of zones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no zones.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of nodes across all zones.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }

    /// Zone index of a node.
    #[must_use]
    pub fn zone_of(&self, node: u8) -> Option<usize> {
        self.0.iter().position(|zone| zone.contains(&node))
    }
}

/// Two nodes tested against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePair {
    /// Node that runs the harness.
    pub initiator: u8,
    /// Node passed as `--target`.
    pub target: u8,
}

impl NodePair {
    /// Hostname of the initiator.
    #[must_use]
    pub fn initiator_host(&self) -> String {
        format!("node-{:02x}", self.initiator)
    }
}

impl fmt::Display for NodePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{:02x} <-> node-{:02x}", self.initiator, self.target)
    }
}

/// Tries once to pair every node with a partner from another zone.
///
/// Returns `None` when the shuffle leaves a node with only same-zone
/// partners or pairs the two non-initiating nodes together.
pub fn try_pairing<R: Rng + ?Sized>(zones: &Zones, rng: &mut R) -> Option<Vec<NodePair>> {
    let mut nodes: Vec<(u8, usize)> = zones
        .0
        .iter()
        .enumerate()
        .flat_map(|(index, zone)| zone.iter().map(move |&node| (node, index)))
        .collect();
    nodes.shuffle(rng);

    let mut pairs = Vec::with_capacity(nodes.len() / 2);
    while let Some((first, zone)) = nodes.pop() {
        if nodes.is_empty() {
            break;
        }
        let partner = nodes.iter().position(|&(_, z)| z != zone)?;
        let (second, _) = nodes.remove(partner);

        if NON_INITIATORS.contains(&first) && NON_INITIATORS.contains(&second) {
            return None;
        }
        pairs.push(if NON_INITIATORS.contains(&first) {
            NodePair {
                initiator: second,
                target: first,
            }
        } else {
            NodePair {
                initiator: first,
                target: second,
            }
        });
    }
    Some(pairs)
}

/// Pairs every node, reshuffling until a valid plan comes out.
///
/// # Errors
///
/// Returns a configuration error if no valid plan is found.
pub fn plan<R: Rng + ?Sized>(zones: &Zones, rng: &mut R) -> Result<Vec<NodePair>> {
    for attempt in 1..=MAX_PLAN_ATTEMPTS {
        if let Some(pairs) = try_pairing(zones, rng) {
            debug!(attempt, pairs = pairs.len(), "pairing planned");
            return Ok(pairs);
        }
        debug!(attempt, "pairing failed, reshuffling");
    }
    Err(HarnessError::config(format!(
        "no cross-zone pairing of {} nodes found after {MAX_PLAN_ATTEMPTS} shuffles",
        zones.node_count()
    )))
}

/// Resolved cross-run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossSettings {
    /// Zones to pair across.
    pub zones: Zones,
    /// Encapsulation passed to every pair.
    pub encap: Encap,
    /// Restrict pairs to the sequence id scenarios.
    pub min: bool,
    /// Rounds to run.
    pub rounds: u32,
    /// Pause between rounds.
    pub wait: Duration,
    /// Run all pairs of a round at once.
    pub parallel: bool,
    /// Plan only.
    pub dry_run: bool,
}

impl From<&CrossOptions> for CrossSettings {
    fn from(opts: &CrossOptions) -> Self {
        let default_rounds = if opts.all { ALL_ROUNDS } else { 1 };
        Self {
            zones: Zones::build(opts.uba || opts.all, opts.utm || opts.all),
            encap: if opts.ipv4 { Encap::Ipv4 } else { Encap::Native },
            min: opts.min,
            rounds: if opts.dry_run {
                1
            } else {
                opts.num.unwrap_or(default_rounds)
            },
            wait: opts.wait.unwrap_or(DEFAULT_WAIT),
            parallel: !opts.serial,
            dry_run: opts.dry_run,
        }
    }
}

/// Outcome of one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairResult {
    /// The pair.
    pub pair: NodePair,
    /// `None` in a dry run.
    pub passed: Option<bool>,
}

/// Outcome of one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    /// Round number, from 1.
    pub round: u32,
    /// Per-pair outcomes in plan order.
    pub results: Vec<PairResult>,
}

impl RoundReport {
    /// Number of failed pairs.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.passed == Some(false))
            .count()
    }
}

/// Runs cross-zone rounds through an [`Executor`].
pub struct CrossRunner {
    exec: Arc<dyn Executor>,
    sleeper: Arc<dyn Sleeper>,
    config: Arc<HarnessConfig>,
    settings: CrossSettings,
}

impl CrossRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        exec: Arc<dyn Executor>,
        sleeper: Arc<dyn Sleeper>,
        config: Arc<HarnessConfig>,
        settings: CrossSettings,
    ) -> Self {
        Self {
            exec,
            sleeper,
            config,
            settings,
        }
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &CrossSettings {
        &self.settings
    }

    /// Command run on the initiator of a pair.
    #[must_use]
    pub fn pair_script(&self, pair: &NodePair) -> String {
        let encap = match self.settings.encap {
            Encap::Ipv4 => "--ipv4",
            Encap::Native => "--use-gw",
        };
        let mut script = format!(
            "{} --target={:02x} {encap}",
            self.config.run_script, pair.target
        );
        if self.settings.min {
            script.push_str(" -k Test0");
        }
        script
    }

    /// Runs every round.
    ///
    /// # Errors
    ///
    /// Returns an error if no pairing plan can be made.
    pub async fn run<R: Rng + Send + ?Sized>(&self, rng: &mut R) -> Result<Vec<RoundReport>> {
        let settings = &self.settings;
        info!(
            nodes = settings.zones.node_count(),
            zones = settings.zones.len(),
            rounds = settings.rounds,
            parallel = settings.parallel,
            "cross test"
        );

        let mut reports = Vec::with_capacity(settings.rounds as usize);
        for round in 1..=settings.rounds {
            let pairs = plan(&settings.zones, rng)?;
            info!(round, pairs = pairs.len(), "round planned");

            let results = if settings.dry_run {
                for pair in &pairs {
                    info!(%pair, script = %self.pair_script(pair), "dry run");
                }
                pairs
                    .into_iter()
                    .map(|pair| PairResult { pair, passed: None })
                    .collect()
            } else if settings.parallel {
                self.run_parallel(pairs).await
            } else {
                self.run_serial(pairs).await
            };

            reports.push(RoundReport { round, results });
            if round < settings.rounds {
                info!(wait = ?settings.wait, "waiting before next round");
                self.sleeper.sleep(settings.wait).await;
            }
        }
        Ok(reports)
    }

    async fn run_serial(&self, pairs: Vec<NodePair>) -> Vec<PairResult> {
        let mut results = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let passed = run_pair(self.exec.as_ref(), pair, &self.pair_script(&pair)).await;
            results.push(PairResult {
                pair,
                passed: Some(passed),
            });
        }
        results
    }

    async fn run_parallel(&self, pairs: Vec<NodePair>) -> Vec<PairResult> {
        let mut set = JoinSet::new();
        for (index, pair) in pairs.iter().copied().enumerate() {
            let exec = Arc::clone(&self.exec);
            let script = self.pair_script(&pair);
            set.spawn(async move { (index, run_pair(exec.as_ref(), pair, &script).await) });
        }

        let mut results: Vec<PairResult> = pairs
            .into_iter()
            .map(|pair| PairResult {
                pair,
                passed: Some(false),
            })
            .collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, passed)) => results[index].passed = Some(passed),
                Err(e) => warn!(error = %e, "pair task failed"),
            }
        }
        results
    }
}

async fn run_pair(exec: &dyn Executor, pair: NodePair, script: &str) -> bool {
    let host = Host::Remote(pair.initiator_host());
    match exec.run(&host, script).await {
        Ok(output) if output.success() => {
            info!(%pair, "pass");
            true
        }
        Ok(output) => {
            warn!(%pair, exit_code = output.exit_code, "fail");
            false
        }
        Err(e) => {
            warn!(%pair, error = %e, "fail");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    #[test]
    fn test_zone_building() {
        let base = Zones::build(false, false);
        assert_eq!(base.len(), 4);
        assert_eq!(base.node_count(), 12);

        let full = Zones::build(true, true);
        assert_eq!(full.len(), 5);
        assert_eq!(full.node_count(), 20);
        assert_eq!(full.zone_of(0x10), Some(0));
        assert_eq!(full.zone_of(0x72), Some(3));
        assert_eq!(full.zone_of(0x23), Some(4));
        assert_eq!(full.zone_of(0x99), None);
    }

    fn assert_valid(zones: &Zones, pairs: &[NodePair]) {
        let mut seen = HashSet::new();
        for pair in pairs {
            assert_ne!(zones.zone_of(pair.initiator), zones.zone_of(pair.target), "{pair}");
            assert!(!NON_INITIATORS.contains(&pair.initiator), "{pair}");
            assert!(seen.insert(pair.initiator));
            assert!(seen.insert(pair.target));
        }
        assert_eq!(pairs.len(), zones.node_count() / 2);
    }

    #[test]
    fn test_plans_are_cross_zone() {
        for (uba, utm) in [(false, false), (true, false), (false, true), (true, true)] {
            let zones = Zones::build(uba, utm);
            for seed in 0..50 {
                let mut rng = StdRng::seed_from_u64(seed);
                let pairs = plan(&zones, &mut rng).unwrap();
                assert_valid(&zones, &pairs);
            }
        }
    }

    #[test]
    fn test_same_seed_same_plan() {
        let zones = Zones::build(true, true);
        let a = plan(&zones, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = plan(&zones, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_zone_cannot_pair() {
        let zones = Zones(vec![vec![1, 2, 3, 4]]);
        assert!(try_pairing(&zones, &mut StdRng::seed_from_u64(1)).is_none());
        assert!(plan(&zones, &mut StdRng::seed_from_u64(1)).unwrap_err().is_config());
    }

    #[test]
    fn test_non_initiators_never_paired_together() {
        let zones = Zones(vec![vec![0x10], vec![0x11]]);
        for seed in 0..10 {
            assert!(try_pairing(&zones, &mut StdRng::seed_from_u64(seed)).is_none());
        }
    }

    #[test]
    fn test_non_initiator_is_swapped_to_target() {
        let zones = Zones(vec![vec![0x10], vec![0x05]]);
        let pairs = try_pairing(&zones, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(
            pairs,
            vec![NodePair {
                initiator: 0x05,
                target: 0x10
            }]
        );
    }

    #[test]
    fn test_settings_from_options() {
        let settings = CrossSettings::from(&CrossOptions::default());
        assert_eq!(settings.rounds, 1);
        assert_eq!(settings.wait, DEFAULT_WAIT);
        assert!(settings.parallel);
        assert_eq!(settings.encap, Encap::Native);
        assert_eq!(settings.zones.node_count(), 12);

        let all = CrossSettings::from(&CrossOptions {
            all: true,
            serial: true,
            ..CrossOptions::default()
        });
        assert_eq!(all.rounds, 5);
        assert_eq!(all.zones.node_count(), 20);
        assert!(!all.parallel);

        let dry = CrossSettings::from(&CrossOptions {
            dry_run: true,
            num: Some(4),
            ..CrossOptions::default()
        });
        assert_eq!(dry.rounds, 1);
    }

    #[test]
    fn test_pair_display() {
        let pair = NodePair {
            initiator: 0x01,
            target: 0x0a,
        };
        assert_eq!(pair.to_string(), "node-01 <-> node-0a");
        assert_eq!(pair.initiator_host(), "node-01");
    }
}
