//! Lock operations: token creation, blocking acquisition, release, inspection.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, Write},
    path::Path,
    time::Instant,
};

use chrono::Utc;
use fs2::FileExt;

use super::queries::{format_holder_record, is_process_alive, parse_holder_record};
use super::types::{
    FileLockHandle, FileLockManager, LockManager, LockMode, TokenState, TokenStatus,
};
use crate::{error::LockError, location::ResourceLocation};

impl Default for FileLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FileLockManager {
    /// Lock manager that creates missing parent directories for the token.
    pub const fn new() -> Self {
        Self {
            create_parent_dirs: true,
        }
    }

    /// Enable or disable creation of the token's parent directories.
    pub const fn with_create_parent_dirs(mut self, create: bool) -> Self {
        self.create_parent_dirs = create;
        self
    }

    /// Report the token's state without blocking and without keeping any lock.
    ///
    /// # Errors
    ///
    /// - `TokenOpenFailed` if the token exists but cannot be opened
    /// - `AcquireFailed` if the probe fails for a reason other than contention
    pub fn inspect(&self, location: &ResourceLocation) -> Result<TokenStatus, LockError> {
        let token_path = location.lock_path();

        if !token_path.exists() {
            return Ok(TokenStatus {
                token_path,
                state: TokenState::Absent,
                last_holder: None,
                holder_alive: None,
            });
        }

        let mut file = File::open(&token_path).map_err(|e| LockError::TokenOpenFailed {
            path: token_path.clone(),
            source: e.into(),
        })?;

        let state = match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                FileExt::unlock(&file).map_err(|e| LockError::ReleaseFailed {
                    path: token_path.clone(),
                    source: e.into(),
                })?;
                TokenState::Free
            }
            Err(err) if is_contended(&err) => TokenState::Held,
            Err(err) => {
                return Err(LockError::AcquireFailed {
                    path: token_path,
                    source: err.into(),
                })
            }
        };

        let mut content = String::new();
        let last_holder = file
            .read_to_string(&mut content)
            .ok()
            .and_then(|_| parse_holder_record(&content));
        let holder_alive = last_holder
            .as_ref()
            .and_then(|record| is_process_alive(record.pid));

        Ok(TokenStatus {
            token_path,
            state,
            last_holder,
            holder_alive,
        })
    }

    fn open_token(&self, location: &ResourceLocation) -> Result<File, LockError> {
        if self.create_parent_dirs {
            if let Some(parent) = location.parent() {
                create_lock_directory(parent)?;
            }
        }

        let token_path = location.lock_path();
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&token_path)
            .map_err(|e| LockError::TokenOpenFailed {
                path: token_path,
                source: e.into(),
            })
    }
}

impl LockManager for FileLockManager {
    type Handle = FileLockHandle;

    fn acquire(
        &self,
        location: &ResourceLocation,
        mode: LockMode,
    ) -> Result<FileLockHandle, LockError> {
        let token_path = location.lock_path();
        let mut file = self.open_token(location)?;

        tracing::debug!(token = %token_path.display(), %mode, "Waiting for lock");
        let started = Instant::now();
        lock_blocking(&file, mode).map_err(|e| LockError::AcquireFailed {
            path: token_path.clone(),
            source: e.into(),
        })?;

        if mode == LockMode::Exclusive {
            if let Err(e) = write_holder_record(&mut file) {
                // Diagnostic only; the OS lock is what excludes other holders
                tracing::warn!(token = %token_path.display(), "Failed to record lock holder: {e}");
            }
        }

        tracing::debug!(
            token = %token_path.display(),
            %mode,
            waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Acquired lock"
        );

        Ok(FileLockHandle {
            location: location.clone(),
            token_path,
            mode,
            file,
            acquired_at: Instant::now(),
            released: false,
        })
    }

    fn release(&self, mut handle: FileLockHandle) -> Result<(), LockError> {
        if handle.mode == LockMode::Exclusive {
            if let Err(e) = handle.file.set_len(0) {
                tracing::warn!(
                    token = %handle.token_path.display(),
                    "Failed to clear lock holder record: {e}"
                );
            }
        }

        let result = FileExt::unlock(&handle.file).map_err(|e| LockError::ReleaseFailed {
            path: handle.token_path.clone(),
            source: e.into(),
        });
        handle.released = result.is_ok();

        tracing::debug!(
            token = %handle.token_path.display(),
            mode = %handle.mode,
            held_ms = u64::try_from(handle.held_for().as_millis()).unwrap_or(u64::MAX),
            "Released lock"
        );
        result
    }
}

/// Create lock directory if it doesn't exist.
fn create_lock_directory(dir: &Path) -> Result<(), LockError> {
    fs::create_dir_all(dir).map_err(|e| LockError::DirectoryCreationFailed {
        path: dir.to_path_buf(),
        source: e.into(),
    })
}

/// Block in the OS lock wait until the token is granted.
fn lock_blocking(file: &File, mode: LockMode) -> io::Result<()> {
    loop {
        let result = match mode {
            LockMode::Exclusive => FileExt::lock_exclusive(file),
            LockMode::Shared => FileExt::lock_shared(file),
        };
        match result {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Replace the token content with this process's holder record.
fn write_holder_record(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    file.rewind()?;
    file.write_all(format_holder_record(std::process::id(), Utc::now()).as_bytes())?;
    file.flush()
}
