//! Command execution on the local and remote node.
//!
//! Every interaction with a node (module parameters, the debug device, `ip`
//! metadata, `trafgen`) goes through an [`Executor`]. The production
//! implementation runs `sh -c` locally and `ssh <host>` remotely; tests
//! substitute a scripted fake.

use std::fmt;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::{HarnessError, Result};

/// Where a command runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    /// The node running the harness.
    Local,
    /// A peer reached over ssh.
    Remote(String),
}

impl Host {
    /// Returns true for the local node.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote(name) => f.write_str(name),
        }
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Creates a successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Creates a failed output.
    #[must_use]
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Synchronous-looking command execution against a node.
///
/// `run` never fails because the command failed; it fails only when the
/// command could not be started. The provided helpers turn non-zero exits
/// into [`HarnessError::Command`].
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs a shell command line on `host` and waits for it to finish.
    async fn run(&self, host: &Host, script: &str) -> Result<CommandOutput>;

    /// Runs a command and fails on a non-zero exit.
    async fn run_checked(&self, host: &Host, script: &str) -> Result<String> {
        let output = self.run(host, script).await?;
        if !output.success() {
            return Err(HarnessError::Command {
                host: host.to_string(),
                command: script.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Reads a file on `host`.
    async fn read_file(&self, host: &Host, path: &str) -> Result<String> {
        self.run_checked(host, &format!("cat {path}")).await
    }

    /// Writes `value` followed by a newline to a file on `host`.
    async fn write_file(&self, host: &Host, path: &str, value: &str) -> Result<()> {
        self.run_checked(host, &format!("echo {value} > {path}"))
            .await
            .map(|_| ())
    }

    /// Copies a local-to-the-host file onto another path of the same host.
    async fn copy_file(&self, host: &Host, from: &str, to: &str) -> Result<()> {
        self.run_checked(host, &format!("cat {from} > {to}"))
            .await
            .map(|_| ())
    }

    /// Returns true when two files on `host` have identical contents.
    async fn files_match(&self, host: &Host, left: &str, right: &str) -> Result<bool> {
        let output = self
            .run(host, &format!("cmp -s {left} {right}"))
            .await?;
        Ok(output.success())
    }

    /// Returns true when `program` is on the host's `PATH`.
    async fn has_program(&self, host: &Host, program: &str) -> Result<bool> {
        let output = self
            .run(host, &format!("command -v {program} > /dev/null"))
            .await?;
        Ok(output.success())
    }
}

/// Runs commands through `sh -c` locally and `ssh` remotely.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    ssh: String,
}

impl ShellExecutor {
    /// Creates an executor that reaches remote hosts with the given ssh binary.
    #[must_use]
    pub fn new(ssh: impl Into<String>) -> Self {
        Self { ssh: ssh.into() }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("ssh")
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn run(&self, host: &Host, script: &str) -> Result<CommandOutput> {
        let mut cmd = match host {
            Host::Local => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(script);
                cmd
            }
            Host::Remote(name) => {
                let mut cmd = Command::new(&self.ssh);
                cmd.arg(name).arg(script);
                cmd
            }
        };

        debug!(%host, script, "exec");
        let output = cmd.kill_on_drop(true).output().await?;
        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!(%host, exit_code = result.exit_code, "exec finished");
        Ok(result)
    }
}
