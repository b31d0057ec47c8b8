//! Query operations for the lock manager.
//!
//! Pure functions for the holder record format and process liveness.

use chrono::{DateTime, Utc};

use super::types::HolderRecord;

/// Render the holder record written into an exclusively held token.
pub(super) fn format_holder_record(pid: u32, acquired_at: DateTime<Utc>) -> String {
    format!("pid={pid} acquired_at={}\n", acquired_at.to_rfc3339())
}

/// Parse token content. Empty or unrecognised content yields `None`.
pub(super) fn parse_holder_record(content: &str) -> Option<HolderRecord> {
    let mut pid = None;
    let mut acquired_at = None;

    for field in content.split_whitespace() {
        match field.split_once('=') {
            Some(("pid", value)) => pid = value.parse::<u32>().ok(),
            Some(("acquired_at", value)) => {
                acquired_at = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|ts| ts.with_timezone(&Utc));
            }
            _ => {}
        }
    }

    pid.map(|pid| HolderRecord { pid, acquired_at })
}

/// Check if a process is still alive.
#[cfg(target_os = "linux")]
pub(super) fn is_process_alive(pid: u32) -> Option<bool> {
    if pid == 0 {
        return Some(false);
    }
    Some(std::path::Path::new(&format!("/proc/{pid}")).exists())
}

#[cfg(not(target_os = "linux"))]
pub(super) fn is_process_alive(_pid: u32) -> Option<bool> {
    // No portable liveness check without unsafe; report unknown
    None
}
