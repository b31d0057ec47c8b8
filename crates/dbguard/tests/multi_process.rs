//! Several `dbguard` processes against one database file.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    path::Path,
    process::{Child, Command, Output, Stdio},
    thread,
    time::{Duration, Instant},
};

use dbguard_core::{FileLockManager, ResourceLocation, TokenState};
use tempfile::TempDir;

const WORKERS: usize = 4;
const ROWS_PER_WORKER: u32 = 25;

fn dbguard(dir: &Path, db: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_dbguard"));
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join(".config"))
        .env_remove("DBGUARD_DATABASE")
        .env_remove("DBGUARD_ACQUIRE_DEADLINE_MS")
        .arg("--db")
        .arg(db);
    cmd
}

fn spawn_writer(dir: &Path, db: &Path, worker: usize, hold_ms: u64) -> Child {
    dbguard(dir, db)
        .args(["write-rows", "--table", "events"])
        .arg("--worker")
        .arg(format!("w{worker}"))
        .arg("--rows")
        .arg(ROWS_PER_WORKER.to_string())
        .arg("--hold-ms")
        .arg(hold_ms.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap()
}

fn query_json(dir: &Path, db: &Path, sql: &str) -> serde_json::Value {
    let output = dbguard(dir, db)
        .args(["query", "--shared", "--json", sql])
        .output()
        .unwrap();
    assert_success(&output);
    serde_json::from_slice(&output.stdout).unwrap()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "dbguard failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn wait_for_state(location: &ResourceLocation, state: TokenState) {
    let started = Instant::now();
    while FileLockManager::new().inspect(location).unwrap().state != state {
        assert!(
            started.elapsed() < Duration::from_secs(30),
            "token never reached {state}"
        );
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn concurrent_writers_are_serialized() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("warehouse").join("analytics.db");

    let children: Vec<Child> = (0..WORKERS)
        .map(|worker| spawn_writer(dir.path(), &db, worker, 30))
        .collect();
    for child in children {
        assert_success(&child.wait_with_output().unwrap());
    }

    let total = query_json(dir.path(), &db, "SELECT COUNT(*) AS n FROM events");
    let expected = u64::try_from(WORKERS).unwrap() * u64::from(ROWS_PER_WORKER);
    assert_eq!(total[0]["n"], expected);

    // Each worker's rows form one contiguous run: sessions never interleaved
    let order = query_json(dir.path(), &db, "SELECT worker FROM events ORDER BY rowid");
    let workers: Vec<&str> = order
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["worker"].as_str().unwrap())
        .collect();
    let switches = workers.windows(2).filter(|pair| pair[0] != pair[1]).count();
    assert_eq!(switches, WORKERS - 1);
}

#[test]
fn killed_holder_does_not_block_next_writer() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("analytics.db");
    let location = ResourceLocation::new(&db).unwrap();

    let mut holder = spawn_writer(dir.path(), &db, 0, 60_000);
    wait_for_state(&location, TokenState::Held);

    holder.kill().unwrap();
    holder.wait().unwrap();
    wait_for_state(&location, TokenState::Free);

    let status = dbguard(dir.path(), &db)
        .args(["status", "--json"])
        .output()
        .unwrap();
    assert_success(&status);
    let status: serde_json::Value = serde_json::from_slice(&status.stdout).unwrap();
    assert_eq!(status["last_holder"]["pid"], holder.id());
    if cfg!(target_os = "linux") {
        assert_eq!(status["stale_record"], true);
    }

    let next = dbguard(dir.path(), &db)
        .args(["--deadline-ms", "10000", "exec", "CREATE TABLE audit (id INTEGER)"])
        .output()
        .unwrap();
    assert_success(&next);

    // The killed session never committed
    let tables = query_json(
        dir.path(),
        &db,
        "SELECT COUNT(*) AS n FROM sqlite_master WHERE name = 'events'",
    );
    assert_eq!(tables[0]["n"], 0);
}
