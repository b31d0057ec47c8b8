//! Resource location and lock token derivation.
//!
//! A [`ResourceLocation`] names the database file. Its lock token lives next to
//! it, at the same path with `.lock` appended to the full file name
//! (`analytics.db` -> `analytics.db.lock`).

use std::{
    ffi::OsString,
    fmt,
    path::{Path, PathBuf},
};

use crate::error::LockError;

/// Suffix appended to the database path to name its lock token.
pub const LOCK_SUFFIX: &str = ".lock";

/// SQLite's in-memory pseudo-path. Each connection gets a private database,
/// so there is nothing to coordinate.
const MEMORY_PATH: &str = ":memory:";

/// Path to a durable, file-backed database. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceLocation {
    path: PathBuf,
}

impl ResourceLocation {
    /// Validate and wrap a database path.
    ///
    /// # Errors
    ///
    /// - `InvalidLocation` if the path is empty, is `:memory:`, does not end
    ///   with a file name (trailing separator), or names an existing directory
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        let invalid = |reason: &str| LockError::InvalidLocation {
            path: path.clone(),
            reason: reason.to_string(),
        };

        if path.as_os_str().is_empty() {
            return Err(invalid("path is empty"));
        }
        if path.as_os_str() == MEMORY_PATH {
            return Err(invalid("in-memory databases cannot be shared across processes"));
        }
        let Some(file_name) = path.file_name() else {
            return Err(invalid("path does not name a file"));
        };
        // `x.db/` and `x.db/.` still report `x.db` as the file name, but
        // appending the suffix to them would not give a sibling token.
        if !path
            .as_os_str()
            .to_string_lossy()
            .ends_with(&*file_name.to_string_lossy())
        {
            return Err(invalid("path must end with the file name"));
        }
        if path.is_dir() {
            return Err(invalid("path is a directory"));
        }

        Ok(Self { path })
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path to the lock token derived from this location.
    pub fn lock_path(&self) -> PathBuf {
        let mut token = OsString::from(self.path.as_os_str());
        token.push(LOCK_SUFFIX);
        PathBuf::from(token)
    }

    /// Directory the database and its token live in, if the path has one.
    pub fn parent(&self) -> Option<&Path> {
        self.path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
    }
}

impl fmt::Display for ResourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl AsRef<Path> for ResourceLocation {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl TryFrom<&str> for ResourceLocation {
    type Error = LockError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<PathBuf> for ResourceLocation {
    type Error = LockError;

    fn try_from(value: PathBuf) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
