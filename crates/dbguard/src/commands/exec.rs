//! Exec command implementation
//!
//! Runs statements in one exclusive session. Either all of them commit or,
//! on the first failing statement, none do.

use anyhow::Result;
use dbguard_core::Coordinator;

#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub statements: Vec<String>,
}

/// Run the statements and return the total number of rows affected.
///
/// # Errors
///
/// Returns the coordinator's error; a failing statement is a `Work` error
/// and rolls back the earlier ones.
pub async fn execute(options: &ExecOptions, coordinator: &Coordinator) -> Result<u64> {
    let statements = options.statements.clone();

    let affected = coordinator
        .run_exclusive(move |conn| {
            Box::pin(async move {
                let mut affected = 0;
                for statement in &statements {
                    let done = sqlx::query(statement).execute(&mut *conn).await?;
                    affected += done.rows_affected();
                }
                Ok::<_, sqlx::Error>(affected)
            })
        })
        .await?;

    Ok(affected)
}

pub async fn run(options: &ExecOptions, coordinator: &Coordinator) -> Result<()> {
    let affected = execute(options, coordinator).await?;
    tracing::info!(
        database = %coordinator.location(),
        statements = options.statements.len(),
        "Committed"
    );
    println!("{affected} row(s) affected");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use dbguard_core::{ErrorKind, ResourceLocation};
    use tempfile::TempDir;

    use super::*;

    fn options(statements: &[&str]) -> ExecOptions {
        ExecOptions {
            statements: statements.iter().map(ToString::to_string).collect(),
        }
    }

    #[tokio::test]
    async fn test_exec_counts_rows_across_statements() {
        let dir = TempDir::new().unwrap();
        let coordinator =
            Coordinator::new(ResourceLocation::new(dir.path().join("a.db")).unwrap());

        let affected = execute(
            &options(&[
                "CREATE TABLE t (id INTEGER)",
                "INSERT INTO t VALUES (1), (2)",
                "UPDATE t SET id = id + 10",
            ]),
            &coordinator,
        )
        .await
        .unwrap();

        assert_eq!(affected, 4);
    }

    #[tokio::test]
    async fn test_exec_failure_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let coordinator =
            Coordinator::new(ResourceLocation::new(dir.path().join("a.db")).unwrap());
        execute(&options(&["CREATE TABLE t (id INTEGER)"]), &coordinator)
            .await
            .unwrap();

        let err = execute(
            &options(&["INSERT INTO t VALUES (1)", "INSERT INTO missing VALUES (1)"]),
            &coordinator,
        )
        .await
        .unwrap_err();
        let err = err
            .downcast_ref::<dbguard_core::CoordinatorError<sqlx::Error>>()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Work);

        let affected = execute(&options(&["DELETE FROM t"]), &coordinator)
            .await
            .unwrap();
        assert_eq!(affected, 0);
    }
}
