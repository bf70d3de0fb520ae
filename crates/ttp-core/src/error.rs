//! Error types for the harness engine.
//!
//! [`HarnessError`] covers fatal conditions that abort a run. Scenario-level
//! mismatches are reported through [`VerifyFailure`](crate::verify::VerifyFailure)
//! and never abort the remaining scenarios.

use thiserror::Error;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors that terminate a harness run.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// I/O error from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or contradictory options, self-targeting, or a bad device.
    ///
    /// Always raised before any resource is acquired.
    #[error("configuration error: {0}")]
    Config(String),

    /// The peer address cannot be mapped to a hostname.
    #[error("cannot resolve peer: {0}")]
    UnresolvedPeer(String),

    /// Another run holds the lock for a node.
    #[error("resource busy: {0}")]
    ResourceBusy(String),

    /// Module activation failed on a node.
    #[error("module load failed on {node}: {reason}")]
    ModuleLoad {
        /// Node the load was attempted on.
        node: String,
        /// Failure detail (usually the command's stderr).
        reason: String,
    },

    /// A bounded wait ran out of attempts.
    #[error("timeout: {0}")]
    Timeout(String),

    /// An external command exited unsuccessfully.
    #[error("command `{command}` failed on {host} (exit {exit_code}): {stderr}")]
    Command {
        /// Host the command ran on.
        host: String,
        /// The command line.
        command: String,
        /// Process exit code (-1 when killed by a signal).
        exit_code: i32,
        /// Captured stderr, trimmed.
        stderr: String,
    },

    /// Unparseable output from an external collaborator.
    #[error("parse error: {0}")]
    Parse(String),
}

impl HarnessError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new parse error.
    #[must_use]
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Creates a new timeout error.
    #[must_use]
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates a new resource busy error.
    #[must_use]
    pub fn resource_busy(msg: impl Into<String>) -> Self {
        Self::ResourceBusy(msg.into())
    }

    /// Returns true for errors raised before any resource was touched.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::UnresolvedPeer(_))
    }

    /// Returns true if this is a lock contention error.
    #[must_use]
    pub const fn is_resource_busy(&self) -> bool {
        matches!(self, Self::ResourceBusy(_))
    }

    /// Returns true if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns true if this is a module load error.
    #[must_use]
    pub const fn is_module_load(&self) -> bool {
        matches!(self, Self::ModuleLoad { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: HarnessError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_config_error() {
        let err = HarnessError::config("cannot combine --use-gw with --ipv4");
        assert!(err.is_config());
        assert_eq!(
            err.to_string(),
            "configuration error: cannot combine --use-gw with --ipv4"
        );
    }

    #[test]
    fn test_module_load_error() {
        let err = HarnessError::ModuleLoad {
            node: "node-0a".to_string(),
            reason: "insmod: ERROR: could not insert module".to_string(),
        };
        assert!(err.is_module_load());
        assert_eq!(
            err.to_string(),
            "module load failed on node-0a: insmod: ERROR: could not insert module"
        );
    }

    #[test]
    fn test_command_error() {
        let err = HarnessError::Command {
            host: "local".to_string(),
            command: "cat /sys/module/modttpoe/parameters/tag_seq".to_string(),
            exit_code: 1,
            stderr: "No such file or directory".to_string(),
        };
        assert!(!err.is_config());
        assert!(err.to_string().contains("exit 1"));
    }
}
