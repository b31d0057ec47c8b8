//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: ~/.config/dbguard/config.toml
//! 3. Project config: .dbguard/config.toml (or an explicit `--config` file)
//! 4. Environment variables: DBGUARD_*
//! 5. CLI flags (applied by the binary)
//!
//! # Example Config
//!
//! ```toml
//! database_path = "data/warehouse/analytics.db"
//! create_parent_dirs = true
//!
//! [connection]
//! create_if_missing = true
//! journal_mode = "delete"
//! busy_timeout_ms = 5000
//!
//! [lock]
//! acquire_deadline_ms = 30000
//! ```

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::Deserialize;
use strum::{Display, EnumString};

use crate::{error::ConfigError, location::ResourceLocation};

const DEFAULT_DATABASE_PATH: &str = "data/warehouse/analytics.db";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
const PROJECT_CONFIG: &str = ".dbguard/config.toml";

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

/// Journal mode for write sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Deserialize)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    #[default]
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub database_path: PathBuf,
    pub create_parent_dirs: bool,
    pub connection: ConnectionConfig,
    pub lock: LockConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Create the database file on first open.
    pub create_if_missing: bool,
    pub journal_mode: JournalMode,
    /// How long SQLite itself retries a busy file before failing.
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockConfig {
    /// Caller-side bound on the lock wait. `None` waits indefinitely.
    pub acquire_deadline_ms: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            create_parent_dirs: true,
            connection: ConnectionConfig::default(),
            lock: LockConfig::default(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            journal_mode: JournalMode::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Layer read from one TOML file; absent keys leave lower layers untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    database_path: Option<PathBuf>,
    create_parent_dirs: Option<bool>,
    connection: Option<PartialConnectionConfig>,
    lock: Option<PartialLockConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConnectionConfig {
    create_if_missing: Option<bool>,
    journal_mode: Option<JournalMode>,
    busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialLockConfig {
    acquire_deadline_ms: Option<u64>,
}

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from all sources with hierarchy.
///
/// `explicit` replaces the project config file; unlike the project file it
/// must exist.
///
/// # Errors
///
/// Returns error if:
/// - An explicit config file is missing or unreadable
/// - A config file is malformed TOML or has unknown keys
/// - An environment override cannot be parsed
/// - The merged values fail validation
pub fn load_config(explicit: Option<&Path>) -> Result<CoordinatorConfig, ConfigError> {
    let project = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => project_config_path().filter(|path| path.exists()),
    };
    let global = global_config_path().filter(|path| path.exists());

    load_config_from(global.as_deref(), project.as_deref())?
        .apply_env_vars()?
        .validated()
}

/// Merge defaults with the given files, without environment overrides or validation.
pub fn load_config_from(
    global: Option<&Path>,
    project: Option<&Path>,
) -> Result<CoordinatorConfig, ConfigError> {
    [global, project]
        .into_iter()
        .flatten()
        .try_fold(CoordinatorConfig::default(), |config, path| {
            load_toml_file(path).map(|layer| config.merge(layer))
        })
}

/// Get path to global config file
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "dbguard")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Get path to project config file
pub fn project_config_path() -> Option<PathBuf> {
    std::env::current_dir()
        .ok()
        .map(|dir| dir.join(PROJECT_CONFIG))
}

fn load_toml_file(path: &Path) -> Result<PartialConfig, ConfigError> {
    if path.is_dir() {
        return Err(ConfigError::Io {
            path: path.to_path_buf(),
            reason: "config path is a directory, not a file".to_string(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// MERGE / ENV / VALIDATION
// ═══════════════════════════════════════════════════════════════════════════

impl CoordinatorConfig {
    fn merge(self, layer: PartialConfig) -> Self {
        let connection = layer.connection.unwrap_or_default();
        let lock = layer.lock.unwrap_or_default();

        Self {
            database_path: layer.database_path.unwrap_or(self.database_path),
            create_parent_dirs: layer.create_parent_dirs.unwrap_or(self.create_parent_dirs),
            connection: ConnectionConfig {
                create_if_missing: connection
                    .create_if_missing
                    .unwrap_or(self.connection.create_if_missing),
                journal_mode: connection
                    .journal_mode
                    .unwrap_or(self.connection.journal_mode),
                busy_timeout_ms: connection
                    .busy_timeout_ms
                    .unwrap_or(self.connection.busy_timeout_ms),
            },
            lock: LockConfig {
                acquire_deadline_ms: lock
                    .acquire_deadline_ms
                    .or(self.lock.acquire_deadline_ms),
            },
        }
    }

    /// Apply `DBGUARD_*` environment overrides.
    ///
    /// `DBGUARD_ACQUIRE_DEADLINE_MS=0` clears any configured deadline.
    pub fn apply_env_vars(self) -> Result<Self, ConfigError> {
        let mut config = self;

        if let Ok(value) = std::env::var("DBGUARD_DATABASE") {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "DBGUARD_DATABASE cannot be empty - unset the variable or provide a path"
                        .to_string(),
                ));
            }
            config.database_path = PathBuf::from(value);
        }

        if let Ok(value) = std::env::var("DBGUARD_CREATE_PARENT_DIRS") {
            config.create_parent_dirs = parse_env("DBGUARD_CREATE_PARENT_DIRS", &value)?;
        }

        if let Ok(value) = std::env::var("DBGUARD_JOURNAL_MODE") {
            config.connection.journal_mode = JournalMode::from_str(value.trim()).map_err(|_| {
                ConfigError::Invalid(format!(
                    "Invalid DBGUARD_JOURNAL_MODE value: {value}. \
                     Must be one of: delete, truncate, persist, memory, wal, off"
                ))
            })?;
        }

        if let Ok(value) = std::env::var("DBGUARD_BUSY_TIMEOUT_MS") {
            config.connection.busy_timeout_ms = parse_env("DBGUARD_BUSY_TIMEOUT_MS", &value)?;
        }

        if let Ok(value) = std::env::var("DBGUARD_ACQUIRE_DEADLINE_MS") {
            let ms: u64 = parse_env("DBGUARD_ACQUIRE_DEADLINE_MS", &value)?;
            config.lock.acquire_deadline_ms = (ms > 0).then_some(ms);
        }

        Ok(config)
    }

    /// Check invariants, returning the config unchanged when they hold.
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.location()?;

        if self.connection.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connection.busy_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.lock.acquire_deadline_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "lock.acquire_deadline_ms must be > 0; omit it to wait indefinitely".to_string(),
            ));
        }

        Ok(self)
    }

    /// The configured database as a validated location.
    pub fn location(&self) -> Result<ResourceLocation, ConfigError> {
        ResourceLocation::new(self.database_path.clone())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn acquire_deadline(&self) -> Option<Duration> {
        self.lock.acquire_deadline_ms.map(Duration::from_millis)
    }
}

impl ConnectionConfig {
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("Invalid {name} value: {e}")))
}
