//! Type definitions for the lock manager.
//!
//! Provides the two-method [`LockManager`] seam, the `fs2`-backed handle, and
//! the diagnostic types returned by token inspection.

use std::{fmt, fs::File, path::PathBuf, time::Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

use crate::{error::LockError, location::ResourceLocation};

/// How the token is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Single holder; required for any write. The default.
    Exclusive,
    /// Any number of concurrent readers, no writer.
    Shared,
}

/// Evidence that a lock token is currently held by this call stack.
///
/// Connections can only be opened against a value implementing this trait.
pub trait HeldLock {
    fn location(&self) -> &ResourceLocation;
    fn mode(&self) -> LockMode;
}

/// Cross-process mutual exclusion on a resource location.
///
/// `acquire` blocks the calling thread until the token is available.
/// It is not reentrant: acquiring a location this process already holds
/// blocks until the first handle is released.
///
/// `release` consumes the handle, so a handle can only be released once and
/// only by whoever owns it.
pub trait LockManager: Send + Sync + fmt::Debug {
    type Handle: HeldLock + Send + Sync + 'static;

    fn acquire(
        &self,
        location: &ResourceLocation,
        mode: LockMode,
    ) -> Result<Self::Handle, LockError>;

    fn release(&self, handle: Self::Handle) -> Result<(), LockError>;
}

/// Lock manager backed by the platform advisory file lock.
///
/// # Platform-Specific Behavior
///
/// - **Unix**: `flock(LOCK_EX)` / `flock(LOCK_SH)`; released by the kernel when
///   the descriptor is closed, including when the process dies
/// - **Windows**: `LockFileEx`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLockManager {
    pub(super) create_parent_dirs: bool,
}

/// This process's possession of a lock token.
///
/// Released explicitly through [`LockManager::release`]. If dropped instead
/// (panic, cancelled task), the holder record is cleared and the OS lock goes
/// away with the file descriptor.
#[derive(Debug)]
pub struct FileLockHandle {
    pub(super) location: ResourceLocation,
    pub(super) token_path: PathBuf,
    pub(super) mode: LockMode,
    pub(super) file: File,
    pub(super) acquired_at: Instant,
    pub(super) released: bool,
}

impl FileLockHandle {
    /// Path to the token file this handle locks.
    pub fn token_path(&self) -> &std::path::Path {
        &self.token_path
    }

    /// Time since the lock was granted.
    pub fn held_for(&self) -> std::time::Duration {
        self.acquired_at.elapsed()
    }
}

impl HeldLock for FileLockHandle {
    fn location(&self) -> &ResourceLocation {
        &self.location
    }

    fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for FileLockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Still locked here; the descriptor closes after this returns.
        if self.mode == LockMode::Exclusive {
            if let Err(e) = self.file.set_len(0) {
                tracing::warn!(
                    token = %self.token_path.display(),
                    "Failed to clear lock holder record on drop: {e}"
                );
            }
        }
        tracing::debug!(
            token = %self.token_path.display(),
            mode = %self.mode,
            "Lock handle dropped without release; descriptor closed"
        );
    }
}

/// Holder record written into the token while it is held exclusively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HolderRecord {
    pub pid: u32,
    pub acquired_at: Option<DateTime<Utc>>,
}

/// Observed state of a token at inspection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// No token file yet; nobody has ever locked this location.
    Absent,
    /// Token exists and nobody holds it.
    Free,
    /// Someone holds the token right now.
    Held,
}

/// Result of a non-blocking token inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenStatus {
    pub token_path: PathBuf,
    pub state: TokenState,
    /// Last holder recorded in the token, if any.
    pub last_holder: Option<HolderRecord>,
    /// Whether `last_holder` is still running; `None` when unknown on this platform.
    pub holder_alive: Option<bool>,
}

impl TokenStatus {
    /// A recorded holder that is gone while the token is not held.
    ///
    /// Harmless: the OS dropped its lock when the process exited.
    pub fn has_stale_record(&self) -> bool {
        self.state != TokenState::Held
            && self.last_holder.is_some()
            && self.holder_alive == Some(false)
    }
}
