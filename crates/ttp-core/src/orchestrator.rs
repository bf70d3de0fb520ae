//! Run orchestration: setup, scenarios, teardown.
//!
//! Setup acquires resources in a fixed order and every failure after the
//! locks are taken rolls back what this run brought up before the error is
//! returned. Teardown is best effort and never fails the run.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::exec::{Executor, Host, ShellExecutor};
use crate::identity::{Identities, IdentityResolver};
use crate::lock::{ExclusiveResource, FsLock, HeldLocks, LockCoordinator};
use crate::module::{ModuleConfig, ModuleLifecycle, ResolvedGateway};
use crate::options::RunContext;
use crate::retry::{Sleeper, TokioSleeper};
use crate::scenario::{RunReport, Scenarios};
use crate::verify::SequenceVerifier;

/// Optional tools found on each node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Toolset {
    /// Packet generator available on self.
    pub local_trafgen: bool,
    /// Packet generator available on the peer.
    pub peer_trafgen: bool,
}

/// Modules this run has loaded and must unload on rollback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Loaded {
    local: bool,
    peer: bool,
}

/// State of an established run.
pub struct Session {
    /// Validated run options.
    pub ctx: RunContext,
    /// Resolved node identities.
    pub identities: Identities,
    /// Local `tag_seq` read after setup.
    pub baseline: u64,
    /// Peer `tag_seq`, when there is a peer.
    pub peer_baseline: Option<u64>,
    /// Next hop resolved on self.
    pub gateway: Option<ResolvedGateway>,
    /// Tool availability.
    pub tools: Toolset,
    loaded: Loaded,
    locks: Option<HeldLocks>,
}

impl Session {
    /// Hosts whose locks are held.
    #[must_use]
    pub fn locked_nodes(&self) -> Vec<String> {
        self.locks
            .as_ref()
            .map(|held| held.owners().into_iter().map(String::from).collect())
            .unwrap_or_default()
    }
}

/// Drives a full harness run.
pub struct Orchestrator {
    exec: Arc<dyn Executor>,
    sleeper: Arc<dyn Sleeper>,
    config: Arc<HarnessConfig>,
    locks: LockCoordinator,
    lifecycle: ModuleLifecycle,
    verifier: SequenceVerifier,
}

impl Orchestrator {
    /// Creates an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        exec: Arc<dyn Executor>,
        locks: Arc<dyn ExclusiveResource>,
        sleeper: Arc<dyn Sleeper>,
        config: Arc<HarnessConfig>,
    ) -> Self {
        let lifecycle = ModuleLifecycle::new(
            Arc::clone(&exec),
            Arc::clone(&sleeper),
            Arc::clone(&config),
        );
        let verifier = SequenceVerifier::new(Arc::clone(&exec), Arc::clone(&config));
        Self {
            exec,
            sleeper,
            config,
            locks: LockCoordinator::new(locks),
            lifecycle,
            verifier,
        }
    }

    /// Creates an orchestrator that runs real commands, locks through the
    /// shared lock directory and really sleeps.
    #[must_use]
    pub fn from_config(config: HarnessConfig) -> Self {
        let exec = Arc::new(ShellExecutor::new(config.ssh.clone()));
        let locks = Arc::new(FsLock::new(config.lock_dir.clone()));
        Self::new(exec, locks, Arc::new(TokioSleeper), Arc::new(config))
    }

    /// Sets up, runs every scenario and tears down.
    ///
    /// # Errors
    ///
    /// Returns the setup error if the run could not be established. Scenario
    /// failures are reported in the [`RunReport`], not as errors.
    pub async fn run(&self, ctx: RunContext) -> Result<RunReport> {
        let session = self.setup(ctx).await?;
        let report = self.run_scenarios(&session).await;
        self.teardown(session).await;
        Ok(report)
    }

    /// Runs the scenarios against an established session.
    pub async fn run_scenarios(&self, session: &Session) -> RunReport {
        Scenarios::new(
            self.exec.as_ref(),
            self.sleeper.as_ref(),
            &self.config,
            &self.lifecycle,
            &self.verifier,
            session,
        )
        .run_all()
        .await
    }

    /// Brings both nodes up.
    ///
    /// # Errors
    ///
    /// * configuration errors before anything is acquired
    /// * [`HarnessError::ResourceBusy`] if a node is locked
    /// * [`HarnessError::ModuleLoad`] or [`HarnessError::Timeout`] after a
    ///   full rollback
    pub async fn setup(&self, ctx: RunContext) -> Result<Session> {
        let identities = IdentityResolver::new(self.exec.as_ref())
            .resolve(&ctx)
            .await?;
        log_identities(&ctx, &identities);

        let tools = self.preflight(&ctx, &identities).await?;

        let held = self.locks.acquire(
            &identities.local.hostname,
            identities.peer.as_ref().map(|p| p.hostname.as_str()),
        )?;

        let mut session = Session {
            ctx,
            identities,
            baseline: 0,
            peer_baseline: None,
            gateway: None,
            tools,
            loaded: Loaded::default(),
            locks: Some(held),
        };

        match self.bring_up(&mut session).await {
            Ok(()) => Ok(session),
            Err(e) => {
                warn!(error = %e, "setup failed, rolling back");
                self.rollback(session).await;
                Err(e)
            }
        }
    }

    /// Checks node prerequisites before any resource is taken.
    async fn preflight(&self, ctx: &RunContext, identities: &Identities) -> Result<Toolset> {
        let debug_device = &self.config.debug_device;
        let char_device_check = format!("test ! -e {debug_device} || test -c {debug_device}");

        if !self.exec.run(&Host::Local, &char_device_check).await?.success() {
            return Err(HarnessError::config(format!(
                "self: {debug_device} is not a character device (remove it if it is a plain file)"
            )));
        }
        let local_trafgen = self.exec.has_program(&Host::Local, &self.config.trafgen).await?;

        let mut tools = Toolset {
            local_trafgen,
            peer_trafgen: false,
        };

        if let Some(peer) = identities.peer_host() {
            if !self.exec.run(&peer, &char_device_check).await?.success() {
                return Err(HarnessError::config(format!(
                    "{peer}: {debug_device} is not a character device (remove it if it is a plain file)"
                )));
            }
            let device = &ctx.peer.device;
            let link = self
                .exec
                .run(&peer, &format!("ip link show dev {device} > /dev/null"))
                .await?;
            if !link.success() {
                return Err(HarnessError::config(format!(
                    "{peer}: device '{device}' not found"
                )));
            }
            tools.peer_trafgen = self.exec.has_program(&peer, &self.config.trafgen).await?;
        }

        if !tools.local_trafgen {
            warn!("no trafgen on self");
        }
        if identities.peer.is_some() && !tools.peer_trafgen {
            warn!("no trafgen on peer");
        }
        Ok(tools)
    }

    async fn bring_up(&self, session: &mut Session) -> Result<()> {
        let ctx = &session.ctx;
        let timing = &self.config.timing;
        let peer = session.identities.peer_host();

        if ctx.skip.load {
            info!("--no-load: skipping local module load");
        } else {
            self.lifecycle
                .load(&Host::Local, &ModuleConfig::for_node(ctx, &ctx.local))
                .await?;
            session.loaded.local = true;

            let target_code = session.identities.target.target_code();
            session.gateway = self
                .lifecycle
                .configure_local(&Host::Local, ctx, &target_code, &timing.gateway_policy())
                .await?;
        }

        session.baseline = self.verifier.baseline(&Host::Local).await?;

        if let Some(peer) = &peer {
            if ctx.skip.load {
                info!("--no-load: skipping peer module load");
            } else {
                self.lifecycle
                    .load(peer, &ModuleConfig::for_node(ctx, &ctx.peer))
                    .await?;
                session.loaded.peer = true;
                self.sleeper.sleep(timing.peer_settle()).await;
            }
            session.peer_baseline = Some(self.verifier.baseline(peer).await?);
        }

        info!(
            baseline = session.baseline,
            peer_baseline = ?session.peer_baseline,
            nhmac = ?session.gateway.map(|g| g.nhmac.to_string()),
            "setup complete"
        );
        Ok(())
    }

    /// Undoes a partial setup: unloads what this run loaded, then releases
    /// the locks.
    async fn rollback(&self, mut session: Session) {
        if session.loaded.local {
            self.lifecycle.unload(&Host::Local).await;
        }
        if session.loaded.peer {
            if let Some(peer) = session.identities.peer_host() {
                self.lifecycle.unload(&peer).await;
            }
        }
        if let Some(held) = session.locks.take() {
            held.release_all();
        }
    }

    /// Unloads both modules (unless `--no-unload`), then releases the locks.
    pub async fn teardown(&self, mut session: Session) {
        if session.ctx.skip.unload {
            info!("--no-unload: leaving modules loaded");
        } else {
            self.lifecycle.unload(&Host::Local).await;
            if let Some(peer) = session.identities.peer_host() {
                self.lifecycle.unload(&peer).await;
            }
        }
        if let Some(held) = session.locks.take() {
            held.release_all();
        }
        info!("teardown complete");
    }
}

fn log_identities(ctx: &RunContext, identities: &Identities) {
    info!(
        host = %identities.local.hostname,
        mac = %identities.local.mac,
        target_code = %identities.local.target_code,
        device = %ctx.local.device,
        encap = %ctx.encap,
        "self"
    );
    match &identities.peer {
        Some(peer) => info!(
            host = %peer.hostname,
            mac = %peer.mac,
            target_code = %peer.target_code,
            device = %ctx.peer.device,
            vci = %ctx.vci,
            use_gw = ctx.use_gateway,
            "peer"
        ),
        None => info!(fragment = %identities.target, "no peer"),
    }
}
