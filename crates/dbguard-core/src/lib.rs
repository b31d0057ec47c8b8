//! # dbguard core
//!
//! Serializes access to a single-writer embedded database file across
//! independent OS processes.
//!
//! The database tolerates one open connection per file. Pipeline steps that
//! run in separate processes cannot share an in-process mutex, so every
//! caller goes through a filesystem-visible lock token (`<db>.lock`) held with
//! the platform's advisory file lock.
//!
//! ## Layers
//!
//! - [`lock`]: the [`LockManager`] trait (`acquire` / `release`) and its
//!   `fs2`-backed implementation [`FileLockManager`]
//! - [`connection`]: opens a [`ConnectionHandle`] only against a held lock and
//!   closes it with commit or rollback
//! - [`coordinator`]: [`Coordinator::run_exclusive`], the scoped "lock, open,
//!   work, close, release" call
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` / `expect()` / `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//!
//! ## Example
//!
//! ```no_run
//! use dbguard_core::{Coordinator, ResourceLocation};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let location = ResourceLocation::new("data/warehouse/analytics.db")?;
//! let coordinator = Coordinator::new(location);
//!
//! let rows = coordinator
//!     .run_exclusive(|conn| {
//!         Box::pin(async move {
//!             sqlx::query("CREATE TABLE IF NOT EXISTS t (id INTEGER)")
//!                 .execute(&mut *conn)
//!                 .await?;
//!             let done = sqlx::query("INSERT INTO t VALUES (1)")
//!                 .execute(&mut *conn)
//!                 .await?;
//!             Ok::<_, sqlx::Error>(done.rows_affected())
//!         })
//!     })
//!     .await?;
//! assert_eq!(rows, 1);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod location;
pub mod lock;
pub mod phase;
pub mod retry;

pub use config::{load_config, ConnectionConfig, CoordinatorConfig, JournalMode, LockConfig};
pub use connection::{ConnectionHandle, ConnectionManager};
pub use coordinator::{run_exclusive, Coordinator, UnitOfWork};
pub use error::{
    ConfigError, ConnectionError, CoordinatorError, ErrorKind, IoErrorKind, LockError,
    TeardownError,
};
pub use location::ResourceLocation;
pub use lock::{
    FileLockHandle, FileLockManager, HeldLock, HolderRecord, LockManager, LockMode, TokenState,
    TokenStatus,
};
pub use phase::Phase;
pub use retry::{with_retry, RetryPolicy};
