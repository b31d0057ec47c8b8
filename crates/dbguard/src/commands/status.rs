//! Status command implementation
//!
//! Reports the lock token without taking it: whether it exists, whether
//! someone holds it right now, and who held it exclusively last.

use std::path::PathBuf;

use anyhow::Result;
use dbguard_core::{Coordinator, TokenState, TokenStatus};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct StatusOptions {
    pub json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub database: PathBuf,
    pub database_exists: bool,
    #[serde(flatten)]
    pub token: TokenStatus,
    /// The recorded holder is gone and the token is not held
    pub stale_record: bool,
}

/// Inspect the token for the coordinator's location.
///
/// # Errors
///
/// Returns an error if the token exists but cannot be opened or probed.
pub fn inspect(coordinator: &Coordinator) -> Result<StatusReport> {
    let location = coordinator.location();
    let token = coordinator.lock_manager().inspect(location)?;

    Ok(StatusReport {
        database: location.path().to_path_buf(),
        database_exists: location.path().exists(),
        stale_record: token.has_stale_record(),
        token,
    })
}

pub fn run(options: &StatusOptions, coordinator: &Coordinator) -> Result<()> {
    let report = inspect(coordinator)?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "database:    {} ({})",
        report.database.display(),
        if report.database_exists { "exists" } else { "missing" }
    );
    println!("token:       {}", report.token.token_path.display());
    println!("state:       {}", report.token.state);

    if let Some(holder) = &report.token.last_holder {
        let since = holder
            .acquired_at
            .map_or_else(|| "unknown time".to_string(), |at| at.to_rfc3339());
        let liveness = match report.token.holder_alive {
            Some(true) => "running",
            Some(false) => "exited",
            None => "unknown",
        };
        println!("last holder: pid {} since {since} ({liveness})", holder.pid);
    } else if report.token.state != TokenState::Absent {
        println!("last holder: none recorded");
    }

    if report.stale_record {
        println!("note:        holder record is stale; the lock was released when that process exited");
    }
    Ok(())
}
