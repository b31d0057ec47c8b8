//! Connection lifecycle for the guarded database.
//!
//! A [`ConnectionHandle`] can only be opened against a [`HeldLock`] and
//! borrows it for its whole life, so the lock cannot be released while the
//! connection is open.
//!
//! Write sessions are opened read-write with `locking_mode = EXCLUSIVE` and run
//! inside one `BEGIN IMMEDIATE` transaction. Closing commits or rolls back and
//! then closes the connection; the close is attempted even when the commit or
//! rollback fails. Dropping a handle without closing it closes the connection,
//! and SQLite discards the open transaction.
//!
//! Shared (read-only) sessions open the file read-only and run without an
//! explicit transaction.

use std::{marker::PhantomData, path::PathBuf};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteLockingMode},
    ConnectOptions, Connection,
};

use crate::{
    config::{ConnectionConfig, JournalMode},
    error::ConnectionError,
    location::ResourceLocation,
    lock::{HeldLock, LockMode},
};

/// Opens connections with a fixed set of options.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    config: ConnectionConfig,
}

/// An open session to the database, valid while the borrowed lock is held.
#[derive(Debug)]
pub struct ConnectionHandle<'lock> {
    conn: SqliteConnection,
    path: PathBuf,
    mode: LockMode,
    in_transaction: bool,
    _lock: PhantomData<&'lock ()>,
}

impl ConnectionManager {
    pub const fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open the database named by `lock`'s location.
    ///
    /// # Errors
    ///
    /// - `OpenFailed` if the file cannot be opened (missing with
    ///   `create_if_missing` off, not a database, permission denied)
    /// - `BeginFailed` if the write transaction cannot be started; the
    ///   connection is closed before returning
    pub async fn open<'l, H>(&self, lock: &'l H) -> Result<ConnectionHandle<'l>, ConnectionError>
    where
        H: HeldLock + Sync,
    {
        let location = lock.location();
        let mode = lock.mode();
        let path = location.path().to_path_buf();

        let mut conn = self
            .connect_options(location, mode)
            .connect()
            .await
            .map_err(|e| ConnectionError::OpenFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let in_transaction = mode == LockMode::Exclusive;
        if in_transaction {
            if let Err(e) = sqlx::query("BEGIN IMMEDIATE").execute(&mut conn).await {
                if let Err(close_err) = conn.close().await {
                    tracing::warn!(
                        path = %path.display(),
                        "Failed to close connection after BEGIN failure: {close_err}"
                    );
                }
                return Err(ConnectionError::BeginFailed {
                    path,
                    reason: e.to_string(),
                });
            }
        }

        tracing::debug!(path = %path.display(), %mode, "Opened connection");
        Ok(ConnectionHandle {
            conn,
            path,
            mode,
            in_transaction,
            _lock: PhantomData,
        })
    }

    fn connect_options(
        &self,
        location: &ResourceLocation,
        mode: LockMode,
    ) -> SqliteConnectOptions {
        let options = SqliteConnectOptions::new()
            .filename(location.path())
            .busy_timeout(self.config.busy_timeout());

        match mode {
            LockMode::Exclusive => options
                .create_if_missing(self.config.create_if_missing)
                .journal_mode(sqlite_journal_mode(self.config.journal_mode))
                .locking_mode(SqliteLockingMode::Exclusive),
            LockMode::Shared => options.read_only(true),
        }
    }
}

impl ConnectionHandle<'_> {
    /// The live connection, for running statements.
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    pub const fn mode(&self) -> LockMode {
        self.mode
    }

    /// End the session: commit (or roll back) pending writes, then close.
    ///
    /// `commit` is ignored for shared sessions, which never write.
    ///
    /// # Errors
    ///
    /// - `CommitFailed` / `RollbackFailed` if ending the transaction fails
    ///   (the connection is still closed)
    /// - `CloseFailed` if only the close fails
    pub async fn close(self, commit: bool) -> Result<(), ConnectionError> {
        let Self {
            mut conn,
            path,
            mode,
            in_transaction,
            ..
        } = self;

        let ended = if in_transaction {
            end_transaction(&mut conn, &path, commit).await
        } else {
            Ok(())
        };

        let closed = conn.close().await.map_err(|e| ConnectionError::CloseFailed {
            path: path.clone(),
            reason: e.to_string(),
        });

        tracing::debug!(
            path = %path.display(),
            %mode,
            committed = in_transaction && commit && ended.is_ok(),
            "Closed connection"
        );

        match (ended, closed) {
            (Err(end_err), Err(close_err)) => {
                tracing::warn!(path = %path.display(), "{close_err}");
                Err(end_err)
            }
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

async fn end_transaction(
    conn: &mut SqliteConnection,
    path: &std::path::Path,
    commit: bool,
) -> Result<(), ConnectionError> {
    let statement = if commit { "COMMIT" } else { "ROLLBACK" };
    sqlx::query(statement)
        .execute(&mut *conn)
        .await
        .map(|_| ())
        .map_err(|e| {
            let path = path.to_path_buf();
            let reason = e.to_string();
            if commit {
                ConnectionError::CommitFailed { path, reason }
            } else {
                ConnectionError::RollbackFailed { path, reason }
            }
        })
}

const fn sqlite_journal_mode(mode: JournalMode) -> SqliteJournalMode {
    match mode {
        JournalMode::Delete => SqliteJournalMode::Delete,
        JournalMode::Truncate => SqliteJournalMode::Truncate,
        JournalMode::Persist => SqliteJournalMode::Persist,
        JournalMode::Memory => SqliteJournalMode::Memory,
        JournalMode::Wal => SqliteJournalMode::Wal,
        JournalMode::Off => SqliteJournalMode::Off,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use sqlx::Row;
    use tempfile::TempDir;

    use super::*;
    use crate::lock::{FileLockManager, LockManager};

    fn location_in(dir: &TempDir) -> ResourceLocation {
        ResourceLocation::new(dir.path().join("analytics.db")).unwrap()
    }

    async fn count_rows(
        manager: &ConnectionManager,
        locks: &FileLockManager,
        location: &ResourceLocation,
    ) -> i64 {
        let lock = locks.acquire(location, LockMode::Shared).unwrap();
        let mut handle = manager.open(&lock).await.unwrap();
        let row = sqlx::query("SELECT COUNT(*) AS n FROM events")
            .fetch_one(handle.connection())
            .await
            .unwrap();
        let n: i64 = row.get("n");
        handle.close(false).await.unwrap();
        locks.release(lock).unwrap();
        n
    }

    async fn create_table(
        manager: &ConnectionManager,
        locks: &FileLockManager,
        location: &ResourceLocation,
    ) {
        let lock = locks.acquire(location, LockMode::Exclusive).unwrap();
        let mut handle = manager.open(&lock).await.unwrap();
        sqlx::query("CREATE TABLE events (id INTEGER)")
            .execute(handle.connection())
            .await
            .unwrap();
        handle.close(true).await.unwrap();
        locks.release(lock).unwrap();
    }

    #[tokio::test]
    async fn test_open_creates_database_file() -> Result<(), ConnectionError> {
        let dir = TempDir::new().unwrap();
        let location = location_in(&dir);
        let locks = FileLockManager::new();
        let manager = ConnectionManager::default();

        let lock = locks.acquire(&location, LockMode::Exclusive).unwrap();
        let handle = manager.open(&lock).await?;
        assert_eq!(handle.mode(), LockMode::Exclusive);
        handle.close(true).await?;
        locks.release(lock).unwrap();

        assert!(location.path().exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_persists_writes() {
        let dir = TempDir::new().unwrap();
        let location = location_in(&dir);
        let locks = FileLockManager::new();
        let manager = ConnectionManager::default();
        create_table(&manager, &locks, &location).await;

        let lock = locks.acquire(&location, LockMode::Exclusive).unwrap();
        let mut handle = manager.open(&lock).await.unwrap();
        sqlx::query("INSERT INTO events VALUES (1), (2)")
            .execute(handle.connection())
            .await
            .unwrap();
        handle.close(true).await.unwrap();
        locks.release(lock).unwrap();

        assert_eq!(count_rows(&manager, &locks, &location).await, 2);
    }

    #[tokio::test]
    async fn test_close_without_commit_discards_writes() {
        let dir = TempDir::new().unwrap();
        let location = location_in(&dir);
        let locks = FileLockManager::new();
        let manager = ConnectionManager::default();
        create_table(&manager, &locks, &location).await;

        let lock = locks.acquire(&location, LockMode::Exclusive).unwrap();
        let mut handle = manager.open(&lock).await.unwrap();
        sqlx::query("INSERT INTO events VALUES (1)")
            .execute(handle.connection())
            .await
            .unwrap();
        handle.close(false).await.unwrap();
        locks.release(lock).unwrap();

        assert_eq!(count_rows(&manager, &locks, &location).await, 0);
    }

    #[tokio::test]
    async fn test_dropped_handle_discards_writes() {
        let dir = TempDir::new().unwrap();
        let location = location_in(&dir);
        let locks = FileLockManager::new();
        let manager = ConnectionManager::default();
        create_table(&manager, &locks, &location).await;

        let lock = locks.acquire(&location, LockMode::Exclusive).unwrap();
        let mut handle = manager.open(&lock).await.unwrap();
        sqlx::query("INSERT INTO events VALUES (1)")
            .execute(handle.connection())
            .await
            .unwrap();
        drop(handle);
        locks.release(lock).unwrap();

        assert_eq!(count_rows(&manager, &locks, &location).await, 0);
    }

    #[tokio::test]
    async fn test_missing_file_without_create_is_open_failure() {
        let dir = TempDir::new().unwrap();
        let location = location_in(&dir);
        let locks = FileLockManager::new();
        let manager = ConnectionManager::new(ConnectionConfig {
            create_if_missing: false,
            ..ConnectionConfig::default()
        });

        let lock = locks.acquire(&location, LockMode::Exclusive).unwrap();
        let result = manager.open(&lock).await;
        assert!(matches!(result, Err(ConnectionError::OpenFailed { .. })));
        locks.release(lock).unwrap();
    }

    #[tokio::test]
    async fn test_shared_session_is_read_only() {
        let dir = TempDir::new().unwrap();
        let location = location_in(&dir);
        let locks = FileLockManager::new();
        let manager = ConnectionManager::default();
        create_table(&manager, &locks, &location).await;

        let lock = locks.acquire(&location, LockMode::Shared).unwrap();
        let mut handle = manager.open(&lock).await.unwrap();
        let result = sqlx::query("INSERT INTO events VALUES (1)")
            .execute(handle.connection())
            .await;
        assert!(result.is_err(), "shared sessions must not write");
        handle.close(true).await.unwrap();
        locks.release(lock).unwrap();
    }

    #[tokio::test]
    async fn test_uncoordinated_writer_is_refused_while_session_open() {
        let dir = TempDir::new().unwrap();
        let location = location_in(&dir);
        let locks = FileLockManager::new();
        let manager = ConnectionManager::default();
        create_table(&manager, &locks, &location).await;

        let lock = locks.acquire(&location, LockMode::Exclusive).unwrap();
        let mut handle = manager.open(&lock).await.unwrap();
        sqlx::query("INSERT INTO events VALUES (1)")
            .execute(handle.connection())
            .await
            .unwrap();

        // A connection that bypasses the lock token gets "database is locked"
        let mut rogue = SqliteConnectOptions::new()
            .filename(location.path())
            .busy_timeout(Duration::from_millis(50))
            .connect()
            .await
            .unwrap();
        let result = sqlx::query("INSERT INTO events VALUES (2)")
            .execute(&mut rogue)
            .await;
        assert!(result.is_err());
        rogue.close().await.unwrap();

        handle.close(true).await.unwrap();
        locks.release(lock).unwrap();
        assert_eq!(count_rows(&manager, &locks, &location).await, 1);
    }

    #[test]
    fn test_journal_mode_mapping() {
        assert!(matches!(
            sqlite_journal_mode(JournalMode::Wal),
            SqliteJournalMode::Wal
        ));
        assert!(matches!(
            sqlite_journal_mode(JournalMode::Delete),
            SqliteJournalMode::Delete
        ));
    }
}
