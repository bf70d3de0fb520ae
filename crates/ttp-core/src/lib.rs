//! # ttp-core
//!
//! Two-node conformance harness for the TTP-over-Ethernet kernel module.
//!
//! A run brings up matching protocol instances on the local node and on a
//! peer, drives exchanges through the module's debug device and the `trafgen`
//! packet generator, and checks sequence counters and buffer accounting in
//! the module's status surfaces.
//!
//! - **Identity**: local address and target code, peer hostname from `--target`
//! - **Locking**: one lock file per node in a shared directory
//! - **Module lifecycle**: `insmod`, next-hop resolution, `rmmod`
//! - **Verification**: typed tag table and counter checks
//! - **Cross runs**: randomized cross-zone pairing over the lab
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                   Orchestrator                    │
//! │   setup ──▶ scenarios ──▶ teardown (+ rollback)   │
//! │  ┌──────────┐ ┌────────────┐ ┌─────────────────┐  │
//! │  │ Identity │ │ LockCoord. │ │ ModuleLifecycle │  │
//! │  └──────────┘ └────────────┘ └─────────────────┘  │
//! │  ┌─────────────────────┐ ┌─────────────────────┐  │
//! │  │  SequenceVerifier   │ │      Scenarios      │  │
//! │  └─────────────────────┘ └─────────────────────┘  │
//! │  ┌─────────────────────────────────────────────┐  │
//! │  │       Executor (sh / ssh)  ·  Sleeper       │  │
//! │  └─────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod cross;
pub mod error;
pub mod exec;
pub mod identity;
pub mod lock;
pub mod module;
pub mod options;
pub mod orchestrator;
pub mod retry;
pub mod scenario;
pub mod status;
pub mod trafgen;
pub mod verify;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use exec::{CommandOutput, Executor, Host, ShellExecutor};
pub use identity::{Identities, MacAddr, NodeIdentity, TargetSpec};
pub use lock::{ExclusiveResource, FsLock, LockCoordinator};
pub use options::{Encap, RunContext, RunOptions, Vci};
pub use orchestrator::{Orchestrator, Session};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use scenario::{Outcome, RunReport};
pub use verify::{SequenceVerifier, Verdict, VerifyFailure};
