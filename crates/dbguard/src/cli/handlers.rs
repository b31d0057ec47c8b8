use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::ArgMatches;
use dbguard_core::{load_config, ConfigError, Coordinator, CoordinatorError};

use crate::commands::{
    exec::{self, ExecOptions},
    query::{self, QueryOptions},
    status::{self, StatusOptions},
    write_rows::{self, WriteRowsOptions},
};

pub async fn dispatch(matches: &ArgMatches) -> Result<()> {
    let coordinator = coordinator_from(matches)?;

    match matches.subcommand() {
        Some(("exec", sub_m)) => {
            let options = ExecOptions {
                statements: sub_m
                    .get_many::<String>("sql")
                    .map(|values| values.cloned().collect())
                    .unwrap_or_default(),
            };
            exec::run(&options, &coordinator).await
        }
        Some(("query", sub_m)) => {
            let options = QueryOptions {
                sql: required(sub_m, "sql")?,
                shared: sub_m.get_flag("shared"),
                json: sub_m.get_flag("json"),
            };
            query::run(&options, &coordinator).await
        }
        Some(("write-rows", sub_m)) => {
            let options = WriteRowsOptions {
                table: required(sub_m, "table")?,
                worker: required(sub_m, "worker")?,
                rows: sub_m.get_one::<u32>("rows").copied().unwrap_or(0),
                hold: Duration::from_millis(sub_m.get_one::<u64>("hold-ms").copied().unwrap_or(0)),
            };
            write_rows::run(&options, &coordinator).await
        }
        Some(("status", sub_m)) => {
            let options = StatusOptions {
                json: sub_m.get_flag("json"),
            };
            status::run(&options, &coordinator)
        }
        _ => anyhow::bail!("Unknown command. Run 'dbguard --help' for usage."),
    }
}

/// Config files and environment first, then command-line overrides.
fn coordinator_from(matches: &ArgMatches) -> Result<Coordinator> {
    let mut config = load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;

    if let Some(db) = matches.get_one::<PathBuf>("db") {
        config.database_path.clone_from(db);
    }
    if let Some(ms) = matches.get_one::<u64>("deadline-ms") {
        config.lock.acquire_deadline_ms = Some(*ms);
    }

    let coordinator = Coordinator::from_config(&config)?;
    tracing::debug!(
        database = %coordinator.location(),
        deadline_ms = config.lock.acquire_deadline_ms,
        "Configured coordinator"
    );
    Ok(coordinator)
}

fn required(matches: &ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .with_context(|| format!("missing required argument '{name}'"))
}

/// Process exit code for a failed command.
///
/// - 1: configuration, usage, or SQL error
/// - 2: lock error
/// - 4: connection error
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<CoordinatorError<sqlx::Error>>() {
        return err.exit_code();
    }
    if let Some(err) = err.downcast_ref::<ConfigError>() {
        return err.exit_code();
    }
    1
}

/// Error message with its cause chain, one cause per line.
pub fn format_error(err: &anyhow::Error) -> String {
    err.chain()
        .skip(1)
        .fold(err.to_string(), |message, cause| {
            format!("{message}\n  caused by: {cause}")
        })
}
