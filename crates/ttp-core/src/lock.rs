//! Cross-host mutual exclusion.
//!
//! A node is locked by the existence of `ttp-host-lock-<hostname>` in a
//! directory shared by every node of the lab. Creation is atomic
//! (`O_CREAT | O_EXCL`); there is no waiting and no queueing.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};

/// Prefix of every lock file name.
pub const LOCK_FILE_PREFIX: &str = "ttp-host-lock-";

/// Proof that a node is held by this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    /// Lock file path.
    pub path: PathBuf,
    /// Hostname of the locked node.
    pub owner: String,
}

/// An exclusive per-node resource.
pub trait ExclusiveResource: Send + Sync {
    /// Takes the resource for `owner` or fails immediately.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ResourceBusy`] when another run holds it.
    fn try_acquire(&self, owner: &str) -> Result<LockHandle>;

    /// Gives the resource back.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock could not be removed.
    fn release(&self, handle: &LockHandle) -> Result<()>;
}

/// Lock files in a shared directory.
#[derive(Debug, Clone)]
pub struct FsLock {
    dir: PathBuf,
}

impl FsLock {
    /// Creates a lock provider rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Lock file path for a host.
    #[must_use]
    pub fn path_for(&self, owner: &str) -> PathBuf {
        self.dir.join(format!("{LOCK_FILE_PREFIX}{owner}"))
    }

    /// Directory holding the lock files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ExclusiveResource for FsLock {
    fn try_acquire(&self, owner: &str) -> Result<LockHandle> {
        let path = self.path_for(owner);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o400)
            .open(&path)
        {
            Ok(_) => {
                debug!(owner, path = %path.display(), "lock acquired");
                Ok(LockHandle {
                    path,
                    owner: owner.to_string(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(HarnessError::resource_busy(
                format!("{owner} already locked ({} exists)", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn release(&self, handle: &LockHandle) -> Result<()> {
        std::fs::remove_file(&handle.path)?;
        debug!(owner = %handle.owner, "lock released");
        Ok(())
    }
}

/// Locks held by one run, released in reverse acquisition order.
///
/// Dropping the guard releases whatever is still held.
pub struct HeldLocks {
    provider: Arc<dyn ExclusiveResource>,
    handles: Vec<LockHandle>,
}

impl HeldLocks {
    /// Hosts currently held, in acquisition order.
    #[must_use]
    pub fn owners(&self) -> Vec<&str> {
        self.handles.iter().map(|h| h.owner.as_str()).collect()
    }

    /// Releases every held lock, newest first. Failures are logged.
    pub fn release_all(mut self) {
        self.release_remaining();
    }

    fn release_remaining(&mut self) {
        while let Some(handle) = self.handles.pop() {
            if let Err(e) = self.provider.release(&handle) {
                warn!(owner = %handle.owner, error = %e, "failed to release lock");
            }
        }
    }
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            warn!(owners = ?self.owners(), "releasing locks on drop");
            self.release_remaining();
        }
    }
}

/// Acquires the local and peer locks as one unit.
pub struct LockCoordinator {
    provider: Arc<dyn ExclusiveResource>,
}

impl LockCoordinator {
    /// Creates a coordinator over a lock provider.
    #[must_use]
    pub fn new(provider: Arc<dyn ExclusiveResource>) -> Self {
        Self { provider }
    }

    /// Locks the local node, then the peer.
    ///
    /// All-or-nothing: if the peer is busy the local lock is released before
    /// the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ResourceBusy`] if either node is locked.
    pub fn acquire(&self, local: &str, peer: Option<&str>) -> Result<HeldLocks> {
        let mut held = HeldLocks {
            provider: Arc::clone(&self.provider),
            handles: Vec::with_capacity(2),
        };

        held.handles.push(self.provider.try_acquire(local)?);
        if let Some(peer) = peer {
            match self.provider.try_acquire(peer) {
                Ok(handle) => held.handles.push(handle),
                Err(e) => {
                    debug!(peer, error = %e, "peer unavailable, releasing local lock");
                    held.release_all();
                    return Err(e);
                }
            }
        }

        info!(owners = ?held.owners(), "nodes locked");
        Ok(held)
    }
}
