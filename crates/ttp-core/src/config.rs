//! Harness settings.
//!
//! Settings describe the lab rather than a single run: where the module and
//! test payloads live, where locks are created, and how long to wait. They
//! are loaded with the following priority:
//!
//! 1. Environment variables (`TTP_HARNESS_*`)
//! 2. User config file (`~/.config/ttp-harness/config.toml`)
//! 3. System config file (`/etc/ttp-harness/config.toml`)
//! 4. Default values
//!
//! ## Example Configuration File
//!
//! ```toml
//! module_path = "/mnt/mac/modttpoe.ko"
//! lock_dir = "/mnt/mac/.locks"
//!
//! [timing]
//! gateway_attempts = 10
//! gateway_interval_ms = 1000
//! peer_settle_ms = 500
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Lab-wide harness settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Kernel module object passed to `insmod`.
    pub module_path: String,
    /// Module name passed to `rmmod`.
    pub module_name: String,
    /// Module parameter directory.
    pub param_dir: String,
    /// Protocol status directory (holds `tags`).
    pub proc_dir: String,
    /// Debug character device for payload injection and capture.
    pub debug_device: String,
    /// Shared directory holding host lock files.
    pub lock_dir: PathBuf,
    /// Directory of payload files and packet templates on every node.
    pub test_data_dir: String,
    /// Per-node run script used by the cross runner.
    pub run_script: String,
    /// ssh binary for remote execution.
    pub ssh: String,
    /// Packet generator binary.
    pub trafgen: String,
    /// Timing knobs.
    pub timing: TimingConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            module_path: "/mnt/mac/modttpoe.ko".to_string(),
            module_name: "modttpoe".to_string(),
            param_dir: "/sys/module/modttpoe/parameters".to_string(),
            proc_dir: "/proc/net/modttpoe".to_string(),
            debug_device: "/dev/noc_debug".to_string(),
            lock_dir: PathBuf::from("/mnt/mac/.locks"),
            test_data_dir: "/mnt/mac/tests".to_string(),
            run_script: "/mnt/mac/tests/run.sh".to_string(),
            ssh: "ssh".to_string(),
            trafgen: "trafgen".to_string(),
            timing: TimingConfig::default(),
        }
    }
}

/// Waits and retry budgets, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Next-hop resolution probes.
    pub gateway_attempts: u32,
    /// Pause between next-hop probes.
    pub gateway_interval_ms: u64,
    /// Pause after loading the peer module.
    pub peer_settle_ms: u64,
    /// Base pause after a cross-node exchange.
    pub exchange_ms: u64,
    /// Pause after the first transmit, which also opens the connection.
    pub first_exchange_ms: u64,
    /// Pause after sending the largest payload.
    pub bulk_exchange_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            gateway_attempts: 10,
            gateway_interval_ms: 1000,
            peer_settle_ms: 500,
            exchange_ms: 100,
            first_exchange_ms: 1000,
            bulk_exchange_ms: 1100,
        }
    }
}

impl TimingConfig {
    /// Retry policy for next-hop resolution.
    #[must_use]
    pub const fn gateway_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.gateway_attempts,
            Duration::from_millis(self.gateway_interval_ms),
        )
    }

    /// Pause after loading the peer module.
    #[must_use]
    pub const fn peer_settle(&self) -> Duration {
        Duration::from_millis(self.peer_settle_ms)
    }

    /// Base pause after an exchange.
    #[must_use]
    pub const fn exchange(&self) -> Duration {
        Duration::from_millis(self.exchange_ms)
    }

    /// Pause after the connection-opening exchange.
    #[must_use]
    pub const fn first_exchange(&self) -> Duration {
        Duration::from_millis(self.first_exchange_ms)
    }

    /// Pause after the largest payload.
    #[must_use]
    pub const fn bulk_exchange(&self) -> Duration {
        Duration::from_millis(self.bulk_exchange_ms)
    }
}

impl HarnessConfig {
    /// Loads settings from the system and user files and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a present file cannot be parsed.
    pub fn load() -> Result<Self, figment::Error> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(system_config_path()));
        if let Some(user) = user_config_path() {
            figment = figment.merge(Toml::file(user));
        }
        figment
            .merge(Env::prefixed("TTP_HARNESS_").split("__"))
            .extract()
    }

    /// Loads settings from a specific file, still honouring the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TTP_HARNESS_").split("__"))
            .extract()
    }

    /// Path of a module parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> String {
        format!("{}/{name}", self.param_dir)
    }

    /// Path of the tag table.
    #[must_use]
    pub fn tags_path(&self) -> String {
        format!("{}/tags", self.proc_dir)
    }

    /// Path of a payload or template file.
    #[must_use]
    pub fn test_file(&self, name: &str) -> String {
        format!("{}/{name}", self.test_data_dir)
    }
}

fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/ttp-harness/config.toml")
}

fn user_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".config/ttp-harness/config.toml"))
}
