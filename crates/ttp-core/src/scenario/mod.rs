//! Protocol scenarios run between setup and teardown.
//!
//! Scenarios run in a fixed order because the sequence checks depend on how
//! many exchanges happened before them. Each one is recorded as passed,
//! failed or skipped; a failure never stops the remaining scenarios.

mod cleanup;
mod packet;
mod proc;
mod seq;
mod traffic;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::exec::{Executor, Host};
use crate::module::ModuleLifecycle;
use crate::orchestrator::Session;
use crate::retry::Sleeper;
use crate::verify::{SequenceVerifier, VerifyFailure};

/// Result of a scenario body.
pub type Check<T = ()> = std::result::Result<T, VerifyFailure>;

/// Payload files exchanged by the round-trip scenarios.
pub const PAYLOAD_FILES: [&str; 5] = ["500", "1000", "2000", "3000", "4000"];

/// Small text file used for sequence checks.
pub const GREET_FILE: &str = "greet";

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// All checks held.
    Passed,
    /// A check failed; carries the diagnostic.
    Failed(String),
    /// Not applicable to this run; carries the reason.
    Skipped(String),
}

impl Outcome {
    /// Returns true for [`Outcome::Failed`].
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// One recorded scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Scenario group.
    pub group: &'static str,
    /// Scenario name within the group.
    pub name: &'static str,
    /// What happened.
    pub outcome: Outcome,
}

/// Every scenario of a run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Recorded scenarios.
    pub scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    fn record(&mut self, group: &'static str, name: &'static str, outcome: Outcome) {
        match &outcome {
            Outcome::Passed => info!(group, name, "passed"),
            Outcome::Failed(reason) => warn!(group, name, %reason, "FAILED"),
            Outcome::Skipped(reason) => info!(group, name, %reason, "skipped"),
        }
        self.scenarios.push(ScenarioReport {
            group,
            name,
            outcome,
        });
    }

    /// Number of passed scenarios.
    #[must_use]
    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    /// Number of failed scenarios.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(Outcome::is_failed)
    }

    /// Number of skipped scenarios.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    /// Returns true when nothing failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Failed scenarios.
    pub fn failures(&self) -> impl Iterator<Item = &ScenarioReport> {
        self.scenarios.iter().filter(|s| s.outcome.is_failed())
    }

    /// Looks up a scenario by group and name.
    #[must_use]
    pub fn get(&self, group: &str, name: &str) -> Option<&ScenarioReport> {
        self.scenarios
            .iter()
            .find(|s| s.group == group && s.name == name)
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.scenarios.iter().filter(|s| pred(&s.outcome)).count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} skipped",
            self.passed(),
            self.failed(),
            self.skipped()
        )
    }
}

/// Precondition of a scenario. The first unmet one becomes the skip reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requirement {
    Peer,
    ModuleReload,
    Packet,
    Traffic,
    BulkTraffic,
    LocalTrafgen,
    PeerTrafgen,
    /// Plain native encapsulation without gateway or fault injection.
    DirectPath,
}

/// Runs scenarios against an established session.
pub struct Scenarios<'a> {
    exec: &'a dyn Executor,
    sleeper: &'a dyn Sleeper,
    config: &'a HarnessConfig,
    lifecycle: &'a ModuleLifecycle,
    verifier: &'a SequenceVerifier,
    session: &'a Session,
}

impl<'a> Scenarios<'a> {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        exec: &'a dyn Executor,
        sleeper: &'a dyn Sleeper,
        config: &'a HarnessConfig,
        lifecycle: &'a ModuleLifecycle,
        verifier: &'a SequenceVerifier,
        session: &'a Session,
    ) -> Self {
        Self {
            exec,
            sleeper,
            config,
            lifecycle,
            verifier,
            session,
        }
    }

    /// Runs every group in order.
    pub async fn run_all(&self) -> RunReport {
        let mut report = RunReport::default();
        self.seq_ids(&mut report).await;
        self.proc(&mut report).await;
        self.packet(&mut report).await;
        self.noc_db(&mut report).await;
        self.traffic(&mut report).await;
        self.cleanup(&mut report).await;
        info!(%report, "scenarios finished");
        report
    }

    /// Runs `body` unless a requirement is unmet, and records the outcome.
    async fn run(
        &self,
        report: &mut RunReport,
        group: &'static str,
        name: &'static str,
        requires: &[Requirement],
        body: impl Future<Output = Check>,
    ) {
        let outcome = match self.unmet(requires) {
            Some(reason) => Outcome::Skipped(reason.to_string()),
            None => match body.await {
                Ok(()) => Outcome::Passed,
                Err(e) => Outcome::Failed(e.to_string()),
            },
        };
        report.record(group, name, outcome);
    }

    fn unmet(&self, requires: &[Requirement]) -> Option<&'static str> {
        let ctx = &self.session.ctx;
        requires.iter().find_map(|req| match req {
            Requirement::Peer if self.session.identities.peer.is_none() => {
                Some("--no-remote specified")
            }
            Requirement::ModuleReload if ctx.skip.load => Some("requires module reload"),
            Requirement::Packet if ctx.skip.packet => Some("--no-packet specified"),
            Requirement::Traffic if ctx.skip.traffic => Some("--no-traffic specified"),
            Requirement::BulkTraffic if ctx.traffic_reps.is_some() => Some("no bulk traffic with --traffic"),
            Requirement::LocalTrafgen if !self.session.tools.local_trafgen => Some("no trafgen on self"),
            Requirement::PeerTrafgen if !self.session.tools.peer_trafgen => Some("no trafgen on peer"),
            Requirement::DirectPath if ctx.encap.is_ipv4() => Some("--ipv4 specified"),
            Requirement::DirectPath if ctx.use_gateway => Some("--use-gw specified"),
            Requirement::DirectPath if ctx.drop_pct > 0 => Some("--drop-pct specified"),
            _ => None,
        })
    }

    fn peer(&self) -> Check<Host> {
        self.session
            .identities
            .peer_host()
            .ok_or_else(|| HarnessError::config("no peer node in this run").into())
    }

    /// Peer address fragment as listed in the local tag table.
    fn peer_fragment(&self) -> String {
        self.session.identities.target.mac_fragment()
    }

    /// Local address fragment as listed in the peer's tag table.
    fn local_fragment(&self) -> String {
        self.session.identities.local.mac_fragment()
    }

    /// Pauses for `base` plus the run's settle time.
    async fn pause(&self, base: Duration) {
        self.sleeper.sleep(base + self.session.ctx.settle).await;
    }

    /// Empties the debug device on a node.
    async fn clear_debug(&self, host: &Host) -> Check {
        self.exec
            .copy_file(host, "/dev/null", &self.config.debug_device)
            .await?;
        Ok(())
    }

    /// Writes a test file into the debug device of a node.
    async fn send_file(&self, host: &Host, file: &str) -> Check {
        self.exec
            .copy_file(host, &self.config.test_file(file), &self.config.debug_device)
            .await?;
        Ok(())
    }

    /// Fails unless the debug device of `host` holds exactly `file`.
    async fn expect_received(&self, host: &Host, file: &str) -> Check {
        let matches = self
            .exec
            .files_match(host, &self.config.debug_device, &self.config.test_file(file))
            .await?;
        if matches {
            Ok(())
        } else {
            Err(VerifyFailure::PayloadMismatch {
                node: host.to_string(),
                file: file.to_string(),
            })
        }
    }
}
