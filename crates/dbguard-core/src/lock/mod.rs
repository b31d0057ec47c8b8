//! Cross-process lock manager for a single-writer database file.
//!
//! Each [`ResourceLocation`](crate::ResourceLocation) has exactly one lock
//! token, `<db>.lock`, created on first acquisition and never removed.
//!
//! # Guarantees
//!
//! - **Mutual Exclusion**: at most one exclusive holder per token, enforced by
//!   the OS advisory lock rather than in-process bookkeeping
//! - **Blocking wait**: acquisition sleeps in the OS lock call; no polling
//! - **Not reentrant**: a second acquisition from the same process blocks
//! - **Crash release**: the kernel drops the lock when the holder's descriptor
//!   closes, so a killed holder never blocks a restart
//!
//! # Example
//!
//! ```no_run
//! use dbguard_core::{FileLockManager, LockManager, LockMode, ResourceLocation};
//!
//! let location = ResourceLocation::new("data/warehouse/analytics.db")?;
//! let locks = FileLockManager::new();
//!
//! let handle = locks.acquire(&location, LockMode::Exclusive)?;
//! // exclusive access to analytics.db here
//! locks.release(handle)?;
//! # Ok::<(), dbguard_core::LockError>(())
//! ```

mod operations;
mod queries;
pub mod types;

// Re-export public API
pub use types::{
    FileLockHandle, FileLockManager, HeldLock, HolderRecord, LockManager, LockMode, TokenState,
    TokenStatus,
};
