//! Scoped access: lock, open, run the unit of work, close, release.
//!
//! Every call walks the same phases:
//!
//! ```text
//! Idle -> Acquiring -> Opening -> Executing -> Closing -> Releasing -> Done
//! ```
//!
//! Any failure once the lock is held still goes through `Releasing`, so a call
//! that returns (with a value or an error) never leaves the token held. A call
//! that is cancelled or panics drops its handles instead, which closes the
//! connection and the token descriptor.
//!
//! # Failure reporting
//!
//! | work   | teardown          | result                          |
//! |--------|-------------------|---------------------------------|
//! | Ok     | ok                | `Ok(value)`                     |
//! | Ok     | close fails       | `Connection` (work rolled back or lost) |
//! | Ok     | release fails     | `Lock(ReleaseFailed)`           |
//! | Err    | ok                | `Work(err)`                     |
//! | Err    | any step fails    | `WorkWithTeardown { error, teardown }` |
//!
//! If opening or closing already failed, a release failure on top of it is
//! logged and the connection error is returned.
//!
//! # Transactions
//!
//! An exclusive call owns the transaction: the connection handed to the unit
//! of work is already inside `BEGIN IMMEDIATE`, and the coordinator commits or
//! rolls back when the work returns. The work must not start, commit, or roll
//! back a transaction itself. `Connection::begin` fails with "cannot start a
//! transaction within a transaction", and a manual `COMMIT` makes the writes
//! durable even if the work then fails. Use `SAVEPOINT` for nested scopes.
//!
//! # Reentrancy
//!
//! Calls are not reentrant. Calling back into the same location from inside a
//! unit of work waits on a lock the caller itself holds and never returns
//! unless a deadline is set.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::future::BoxFuture;
use sqlx::sqlite::SqliteConnection;

use crate::{
    config::CoordinatorConfig,
    connection::ConnectionManager,
    error::{ConfigError, CoordinatorError, LockError},
    location::ResourceLocation,
    lock::{FileLockManager, LockManager, LockMode},
    phase::Phase,
};

/// Future returned by a unit of work borrowing the connection for `'c`.
///
/// Units of work are written as `|conn| Box::pin(async move { ... })`. In an
/// exclusive call the connection is already inside the call's transaction;
/// see the module docs before issuing `BEGIN`, `COMMIT` or `ROLLBACK`.
pub type UnitOfWork<'c, T, E> = BoxFuture<'c, Result<T, E>>;

/// Serializes units of work against one database file.
///
/// Cheap to clone; clones share the lock manager.
#[derive(Debug)]
pub struct Coordinator<L: LockManager = FileLockManager> {
    location: ResourceLocation,
    locks: Arc<L>,
    connections: ConnectionManager,
    deadline: Option<Duration>,
}

impl<L: LockManager> Clone for Coordinator<L> {
    fn clone(&self) -> Self {
        Self {
            location: self.location.clone(),
            locks: Arc::clone(&self.locks),
            connections: self.connections.clone(),
            deadline: self.deadline,
        }
    }
}

impl Coordinator<FileLockManager> {
    /// Coordinator with the file lock manager and default connection options.
    pub fn new(location: ResourceLocation) -> Self {
        Self::with_lock_manager(location, FileLockManager::new())
    }

    /// Build from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the configured database path is not a
    /// usable resource location.
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self, ConfigError> {
        let locks = FileLockManager::new().with_create_parent_dirs(config.create_parent_dirs);
        Ok(Self {
            location: config.location()?,
            locks: Arc::new(locks),
            connections: ConnectionManager::new(config.connection.clone()),
            deadline: config.acquire_deadline(),
        })
    }
}

impl<L> Coordinator<L>
where
    L: LockManager + 'static,
{
    pub fn with_lock_manager(location: ResourceLocation, locks: L) -> Self {
        Self {
            location,
            locks: Arc::new(locks),
            connections: ConnectionManager::default(),
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_connections(mut self, connections: ConnectionManager) -> Self {
        self.connections = connections;
        self
    }

    /// Default wait limit for [`run_exclusive`](Self::run_exclusive) and
    /// [`run_shared`](Self::run_shared). `None` waits indefinitely.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub const fn location(&self) -> &ResourceLocation {
        &self.location
    }

    pub const fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn lock_manager(&self) -> &L {
        &self.locks
    }

    /// Run `work` with exclusive, transactional access to the database.
    ///
    /// The transaction commits only if `work` returns `Ok`. `work` runs inside
    /// that transaction and must not begin or end one of its own.
    ///
    /// # Errors
    ///
    /// - `Lock` if the token cannot be acquired (or released after success)
    /// - `Connection` if the database cannot be opened or the commit/close fails
    /// - `Work` with the unit of work's own error, unchanged
    /// - `WorkWithTeardown` if `work` failed and rollback, close, or release
    ///   failed after it
    pub async fn run_exclusive<T, E, F>(&self, work: F) -> Result<T, CoordinatorError<E>>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> UnitOfWork<'c, T, E> + Send,
        T: Send,
        E: Send,
    {
        self.run(LockMode::Exclusive, self.deadline, work).await
    }

    /// Like [`run_exclusive`](Self::run_exclusive), but give up with
    /// `LockError::DeadlineElapsed` if the lock is not granted within `deadline`.
    ///
    /// # Errors
    ///
    /// See [`run_exclusive`](Self::run_exclusive).
    pub async fn run_exclusive_within<T, E, F>(
        &self,
        deadline: Duration,
        work: F,
    ) -> Result<T, CoordinatorError<E>>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> UnitOfWork<'c, T, E> + Send,
        T: Send,
        E: Send,
    {
        self.run(LockMode::Exclusive, Some(deadline), work).await
    }

    /// Run `work` on a read-only connection under a shared lock.
    ///
    /// Shared holders run concurrently with each other and never alongside an
    /// exclusive holder.
    ///
    /// # Errors
    ///
    /// See [`run_exclusive`](Self::run_exclusive). Writes attempted by `work`
    /// fail inside the work and surface as `Work`.
    pub async fn run_shared<T, E, F>(&self, work: F) -> Result<T, CoordinatorError<E>>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> UnitOfWork<'c, T, E> + Send,
        T: Send,
        E: Send,
    {
        self.run(LockMode::Shared, self.deadline, work).await
    }

    async fn run<T, E, F>(
        &self,
        mode: LockMode,
        deadline: Option<Duration>,
        work: F,
    ) -> Result<T, CoordinatorError<E>>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> UnitOfWork<'c, T, E> + Send,
        T: Send,
        E: Send,
    {
        let started = Instant::now();
        let mut progress = Progress::new(&self.location, mode);

        progress.advance();
        let lock = match self.acquire(mode, deadline).await {
            Ok(lock) => lock,
            Err(err) => {
                progress.fail();
                return Err(err.into());
            }
        };

        let outcome = self.execute(&lock, &mut progress, work).await;
        if outcome.is_ok() {
            progress.advance();
        } else {
            progress.fail();
        }
        let released = self.locks.release(lock);

        let result = match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release_err)) => Err(CoordinatorError::Lock(release_err)),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => match err.with_teardown(release_err.into()) {
                Ok(err) => Err(err),
                Err((err, release_err)) => {
                    tracing::error!(
                        location = %self.location,
                        "Lock release failed after {}: {release_err}",
                        err.kind()
                    );
                    Err(err)
                }
            },
        };

        if result.is_ok() {
            progress.advance();
        } else {
            progress.fail();
        }

        let elapsed_ms = started.elapsed().as_millis();
        match &result {
            Ok(_) => tracing::debug!(
                location = %self.location,
                %mode,
                phase = %progress.phase,
                elapsed_ms,
                "Scoped access finished"
            ),
            Err(err) => tracing::debug!(
                location = %self.location,
                %mode,
                phase = %progress.phase,
                failed_in = %err.phase(),
                kind = %err.kind(),
                teardown_failures = err.teardown().len(),
                elapsed_ms,
                "Scoped access failed"
            ),
        }
        result
    }

    /// Opening, executing and closing, all while `lock` is held.
    ///
    /// Leaves `progress` in `Opening` if the open failed, `Closing` otherwise.
    async fn execute<T, E, F>(
        &self,
        lock: &L::Handle,
        progress: &mut Progress<'_>,
        work: F,
    ) -> Result<T, CoordinatorError<E>>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> UnitOfWork<'c, T, E> + Send,
        T: Send,
        E: Send,
    {
        progress.advance();
        let mut handle = self.connections.open(lock).await?;

        progress.advance();
        let result = work(handle.connection()).await;

        progress.advance();
        let closed = handle.close(result.is_ok()).await;

        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(CoordinatorError::Connection(close_err)),
            (Err(work_err), Ok(())) => Err(CoordinatorError::Work(work_err)),
            (Err(work_err), Err(close_err)) => Err(CoordinatorError::WorkWithTeardown {
                error: work_err,
                teardown: vec![close_err.into()],
            }),
        }
    }

    /// Wait for the token on a blocking thread.
    ///
    /// If the deadline passes (or the caller is cancelled) the blocking wait
    /// keeps running; when it is eventually granted, the handle is dropped at
    /// once and the token released.
    async fn acquire(
        &self,
        mode: LockMode,
        deadline: Option<Duration>,
    ) -> Result<L::Handle, LockError> {
        let locks = Arc::clone(&self.locks);
        let location = self.location.clone();
        let started = Instant::now();
        let waiting = tokio::task::spawn_blocking(move || locks.acquire(&location, mode));

        let joined = match deadline {
            None => waiting.await,
            Some(limit) => match tokio::time::timeout(limit, waiting).await {
                Ok(joined) => joined,
                Err(_) => {
                    let waited_ms =
                        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    tracing::warn!(
                        location = %self.location,
                        %mode,
                        waited_ms,
                        "Gave up waiting for lock"
                    );
                    return Err(LockError::DeadlineElapsed {
                        path: self.location.lock_path(),
                        waited_ms,
                    });
                }
            },
        };

        joined.map_err(|e| LockError::Interrupted {
            path: self.location.lock_path(),
            reason: e.to_string(),
        })?
    }

}

/// Phase of one call, moved only along the edges [`Phase`] allows.
struct Progress<'a> {
    location: &'a ResourceLocation,
    mode: LockMode,
    phase: Phase,
}

impl<'a> Progress<'a> {
    const fn new(location: &'a ResourceLocation, mode: LockMode) -> Self {
        Self {
            location,
            mode,
            phase: Phase::Idle,
        }
    }

    fn advance(&mut self) {
        if let Some(next) = self.phase.next() {
            self.enter(next);
        }
    }

    fn fail(&mut self) {
        self.enter(self.phase.on_failure());
    }

    fn enter(&mut self, phase: Phase) {
        tracing::trace!(
            location = %self.location,
            mode = %self.mode,
            from = %self.phase,
            to = %phase,
            holds_lock = phase.holds_lock(),
            "Phase transition"
        );
        self.phase = phase;
    }
}

/// One-shot exclusive access to `location` with default options.
///
/// # Errors
///
/// See [`Coordinator::run_exclusive`].
pub async fn run_exclusive<T, E, F>(
    location: &ResourceLocation,
    work: F,
) -> Result<T, CoordinatorError<E>>
where
    F: for<'c> FnOnce(&'c mut SqliteConnection) -> UnitOfWork<'c, T, E> + Send,
    T: Send,
    E: Send,
{
    Coordinator::new(location.clone()).run_exclusive(work).await
}
