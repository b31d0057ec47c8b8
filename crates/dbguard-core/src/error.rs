//! Error taxonomy for coordinated database access.
//!
//! - **Lock errors**: the lock token could not be acquired or released (exit code 2)
//! - **Connection errors**: the database could not be opened, committed, or closed
//!   while the lock was held (exit code 4)
//! - **Work errors**: the caller's unit of work failed; surfaced unchanged (exit code 1),
//!   together with any rollback, close, or release failure that followed it
//!
//! Configuration problems use [`ConfigError`] (exit code 1).

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::phase::Phase;

/// Failure to obtain or give up the cross-process lock token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The resource location cannot be used as a lock target
    #[error("invalid resource location '{path}': {reason}")]
    InvalidLocation { path: PathBuf, reason: String },

    /// Parent directory of the lock token could not be created
    #[error("failed to create lock directory at {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: IoErrorKind,
    },

    /// Lock token could not be opened or created
    #[error("failed to open lock token at {path}: {source}")]
    TokenOpenFailed {
        path: PathBuf,
        #[source]
        source: IoErrorKind,
    },

    /// The OS lock call itself failed
    #[error("failed to lock {path}: {source}")]
    AcquireFailed {
        path: PathBuf,
        #[source]
        source: IoErrorKind,
    },

    /// The OS unlock call failed
    #[error("failed to release lock {path}: {source}")]
    ReleaseFailed {
        path: PathBuf,
        #[source]
        source: IoErrorKind,
    },

    /// A caller-supplied deadline passed while waiting for the lock
    #[error("gave up waiting for lock {path} after {waited_ms} ms")]
    DeadlineElapsed { path: PathBuf, waited_ms: u64 },

    /// The thread blocked in the lock wait was cancelled or panicked
    #[error("lock wait on {path} was interrupted: {reason}")]
    Interrupted { path: PathBuf, reason: String },
}

/// Failure to open or tear down a database connection while the lock was held.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("failed to open database {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("failed to begin transaction on {path}: {reason}")]
    BeginFailed { path: PathBuf, reason: String },

    #[error("failed to commit {path}: {reason}")]
    CommitFailed { path: PathBuf, reason: String },

    #[error("failed to roll back {path}: {reason}")]
    RollbackFailed { path: PathBuf, reason: String },

    #[error("failed to close database {path}: {reason}")]
    CloseFailed { path: PathBuf, reason: String },
}

impl ConnectionError {
    /// Phase of the call in which this error arose.
    pub const fn phase(&self) -> Phase {
        match self {
            Self::OpenFailed { .. } | Self::BeginFailed { .. } => Phase::Opening,
            Self::CommitFailed { .. } | Self::RollbackFailed { .. } | Self::CloseFailed { .. } => {
                Phase::Closing
            }
        }
    }
}

impl LockError {
    /// Phase of the call in which this error arose.
    pub const fn phase(&self) -> Phase {
        match self {
            Self::ReleaseFailed { .. } => Phase::Releasing,
            _ => Phase::Acquiring,
        }
    }
}

/// Rollback, close, or release failure that followed a failed unit of work.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TeardownError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

fn describe(failures: &[TeardownError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Coarse classification of a [`CoordinatorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Lock,
    Connection,
    Work,
}

/// Result of a failed scoped-access call.
///
/// `E` is the unit of work's own error type; it is carried through untouched.
#[derive(Debug, Error)]
pub enum CoordinatorError<E> {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("unit of work failed: {0}")]
    Work(E),

    /// The unit of work failed, and tearing the session down failed after it.
    /// `error` is the work's error, unchanged; `teardown` is in the order the
    /// steps ran (connection first, then the lock).
    #[error("unit of work failed: {error}; teardown also failed: {}", describe(.teardown))]
    WorkWithTeardown {
        error: E,
        teardown: Vec<TeardownError>,
    },
}

impl<E> CoordinatorError<E> {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Lock(_) => ErrorKind::Lock,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Work(_) | Self::WorkWithTeardown { .. } => ErrorKind::Work,
        }
    }

    /// Phase of the call in which the failure arose.
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Lock(err) => err.phase(),
            Self::Connection(err) => err.phase(),
            Self::Work(_) | Self::WorkWithTeardown { .. } => Phase::Executing,
        }
    }

    /// Whether a caller-side retry has a reasonable chance of succeeding.
    ///
    /// Only failures to open the database and elapsed lock deadlines qualify.
    /// Work errors are business failures and are never transient here.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(ConnectionError::OpenFailed { .. })
                | Self::Lock(LockError::DeadlineElapsed { .. })
        )
    }

    /// Exit code scheme:
    /// - 1: unit of work failed
    /// - 2: lock error
    /// - 4: connection error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Lock(_) => 2,
            Self::Connection(_) => 4,
            Self::Work(_) | Self::WorkWithTeardown { .. } => 1,
        }
    }

    /// The unit of work's error, if that is what failed.
    pub fn into_work(self) -> Option<E> {
        match self {
            Self::Work(err) | Self::WorkWithTeardown { error: err, .. } => Some(err),
            Self::Lock(_) | Self::Connection(_) => None,
        }
    }

    /// Teardown failures reported alongside a work error; empty otherwise.
    pub fn teardown(&self) -> &[TeardownError] {
        match self {
            Self::WorkWithTeardown { teardown, .. } => teardown,
            _ => &[],
        }
    }

    /// Attach a teardown failure to a work error.
    ///
    /// Lock and connection errors have no work error to carry it; they are
    /// returned unchanged along with the rejected failure.
    pub(crate) fn with_teardown(
        self,
        failure: TeardownError,
    ) -> Result<Self, (Self, TeardownError)> {
        match self {
            Self::Work(error) => Ok(Self::WorkWithTeardown {
                error,
                teardown: vec![failure],
            }),
            Self::WorkWithTeardown { error, mut teardown } => {
                teardown.push(failure);
                Ok(Self::WorkWithTeardown { error, teardown })
            }
            other @ (Self::Lock(_) | Self::Connection(_)) => Err((other, failure)),
        }
    }

    /// Transform the work error type, leaving lock and connection errors as they are.
    pub fn map_work<F, E2>(self, f: F) -> CoordinatorError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Lock(err) => CoordinatorError::Lock(err),
            Self::Connection(err) => CoordinatorError::Connection(err),
            Self::Work(err) => CoordinatorError::Work(f(err)),
            Self::WorkWithTeardown { error, teardown } => CoordinatorError::WorkWithTeardown {
                error: f(error),
                teardown,
            },
        }
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("failed to parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

/// IO error kinds (cloneable, no source chain issues)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoErrorKind {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    WouldBlock,
    InvalidInput,
    TimedOut,
    Interrupted,
    Unsupported,
    Other(String),
}

impl std::fmt::Display for IoErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::WouldBlock => write!(f, "would block"),
            Self::InvalidInput => write!(f, "invalid input"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for IoErrorKind {}

impl From<io::Error> for IoErrorKind {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::AlreadyExists => Self::AlreadyExists,
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            io::ErrorKind::InvalidInput => Self::InvalidInput,
            io::ErrorKind::TimedOut => Self::TimedOut,
            io::ErrorKind::Interrupted => Self::Interrupted,
            io::ErrorKind::Unsupported => Self::Unsupported,
            _ => Self::Other(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn path() -> PathBuf {
        PathBuf::from("/tmp/warehouse.db")
    }

    #[test]
    fn test_io_error_kind_from_io_error() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(IoErrorKind::from(err), IoErrorKind::PermissionDenied);

        let err = io::Error::new(io::ErrorKind::Other, "disk on fire");
        assert_eq!(
            IoErrorKind::from(err),
            IoErrorKind::Other("disk on fire".to_string())
        );
    }

    #[test]
    fn test_lock_error_display_includes_path() {
        let err = LockError::AcquireFailed {
            path: path(),
            source: IoErrorKind::PermissionDenied,
        };
        assert_eq!(
            err.to_string(),
            "failed to lock /tmp/warehouse.db: permission denied"
        );
    }

    #[test]
    fn test_coordinator_error_classification() {
        let lock: CoordinatorError<String> = LockError::DeadlineElapsed {
            path: path(),
            waited_ms: 50,
        }
        .into();
        assert_eq!(lock.kind(), ErrorKind::Lock);
        assert_eq!(lock.phase(), Phase::Acquiring);
        assert_eq!(lock.exit_code(), 2);
        assert!(lock.is_transient());

        let conn: CoordinatorError<String> = ConnectionError::CommitFailed {
            path: path(),
            reason: "disk I/O error".to_string(),
        }
        .into();
        assert_eq!(conn.kind(), ErrorKind::Connection);
        assert_eq!(conn.phase(), Phase::Closing);
        assert_eq!(conn.exit_code(), 4);
        assert!(!conn.is_transient());

        let work: CoordinatorError<String> = CoordinatorError::Work("bad row".to_string());
        assert_eq!(work.kind(), ErrorKind::Work);
        assert_eq!(work.phase(), Phase::Executing);
        assert_eq!(work.exit_code(), 1);
        assert!(!work.is_transient());
        assert_eq!(work.to_string(), "unit of work failed: bad row");
    }

    #[test]
    fn test_open_failure_is_transient() {
        let err: CoordinatorError<String> = ConnectionError::OpenFailed {
            path: path(),
            reason: "database is locked".to_string(),
        }
        .into();
        assert!(err.is_transient());
        assert_eq!(err.phase(), Phase::Opening);
    }

    #[test]
    fn test_release_failure_phase() {
        let err = LockError::ReleaseFailed {
            path: path(),
            source: IoErrorKind::Other("EBADF".to_string()),
        };
        assert_eq!(err.phase(), Phase::Releasing);
    }

    #[test]
    fn test_into_work_and_map_work() {
        let work: CoordinatorError<&str> = CoordinatorError::Work("boom");
        let mapped = work.map_work(str::len);
        assert!(matches!(mapped, CoordinatorError::Work(4)));

        let lock: CoordinatorError<&str> = LockError::Interrupted {
            path: path(),
            reason: "cancelled".to_string(),
        }
        .into();
        assert_eq!(lock.into_work(), None);
    }

    #[test]
    fn test_teardown_failures_ride_along_with_work_error() {
        let rollback = ConnectionError::RollbackFailed {
            path: path(),
            reason: "no transaction is active".to_string(),
        };
        let release = LockError::ReleaseFailed {
            path: PathBuf::from("/tmp/warehouse.db.lock"),
            source: IoErrorKind::Other("EBADF".to_string()),
        };

        let err = CoordinatorError::Work("bad row")
            .with_teardown(rollback.clone().into())
            .and_then(|err| err.with_teardown(release.clone().into()))
            .unwrap();

        assert_eq!(err.kind(), ErrorKind::Work);
        assert_eq!(err.exit_code(), 1);
        assert_eq!(
            err.teardown(),
            [TeardownError::from(rollback), TeardownError::from(release)]
        );
        let message = err.to_string();
        assert!(message.starts_with("unit of work failed: bad row; teardown also failed:"));
        assert!(message.contains("failed to roll back"));
        assert!(message.contains("failed to release lock"));
        assert_eq!(err.map_work(str::len).into_work(), Some(7));
    }

    #[test]
    fn test_teardown_is_not_attached_to_infrastructure_errors() {
        let open: CoordinatorError<String> = ConnectionError::OpenFailed {
            path: path(),
            reason: "unable to open database file".to_string(),
        }
        .into();
        assert!(open.teardown().is_empty());

        let release = TeardownError::from(LockError::ReleaseFailed {
            path: path(),
            source: IoErrorKind::Interrupted,
        });
        let (kept, rejected) = open.with_teardown(release.clone()).unwrap_err();
        assert_eq!(kept.kind(), ErrorKind::Connection);
        assert_eq!(rejected, release);
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::Connection.to_string(), "connection");
    }
}
