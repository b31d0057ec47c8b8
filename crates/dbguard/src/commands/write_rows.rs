//! Write-rows command implementation
//!
//! Appends `rows` rows tagged with a worker id in one exclusive session,
//! optionally holding the session open afterwards. Several of these running
//! at once against one file show whether writers are serialized.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use dbguard_core::Coordinator;

#[derive(Debug, Clone)]
pub struct WriteRowsOptions {
    pub table: String,
    pub worker: String,
    pub rows: u32,
    /// How long to keep the session open after the inserts
    pub hold: Duration,
}

/// Append the rows; returns how many were written.
///
/// # Errors
///
/// - Invalid table name (before any lock is taken)
/// - The coordinator's error otherwise
pub async fn execute(options: &WriteRowsOptions, coordinator: &Coordinator) -> Result<u32> {
    validate_table_name(&options.table)?;

    let create = format!(
        "CREATE TABLE IF NOT EXISTS {} (worker TEXT NOT NULL, seq INTEGER NOT NULL, written_at TEXT NOT NULL)",
        options.table
    );
    let insert = format!(
        "INSERT INTO {} (worker, seq, written_at) VALUES (?, ?, ?)",
        options.table
    );
    let worker = options.worker.clone();
    let rows = options.rows;
    let hold = options.hold;

    let written = coordinator
        .run_exclusive(move |conn| {
            Box::pin(async move {
                sqlx::query(&create).execute(&mut *conn).await?;
                for seq in 0..rows {
                    sqlx::query(&insert)
                        .bind(&worker)
                        .bind(i64::from(seq))
                        .bind(Utc::now().to_rfc3339())
                        .execute(&mut *conn)
                        .await?;
                }
                if !hold.is_zero() {
                    tokio::time::sleep(hold).await;
                }
                Ok::<_, sqlx::Error>(rows)
            })
        })
        .await?;

    Ok(written)
}

pub async fn run(options: &WriteRowsOptions, coordinator: &Coordinator) -> Result<()> {
    let written = execute(options, coordinator).await?;
    tracing::info!(
        database = %coordinator.location(),
        worker = %options.worker,
        rows = written,
        "Rows written"
    );
    println!("worker {} wrote {written} row(s) to {}", options.worker, options.table);
    Ok(())
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!(
            "Invalid table name '{name}': use letters, digits and underscores, not starting with a digit"
        );
    }
    if name.to_ascii_lowercase().starts_with("sqlite_") {
        anyhow::bail!("Invalid table name '{name}': names starting with 'sqlite_' are reserved");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use dbguard_core::ResourceLocation;
    use sqlx::Row;
    use tempfile::TempDir;

    use super::*;

    fn options(worker: &str, rows: u32) -> WriteRowsOptions {
        WriteRowsOptions {
            table: "events".to_string(),
            worker: worker.to_string(),
            rows,
            hold: Duration::ZERO,
        }
    }

    #[test]
    fn test_table_name_validation() {
        assert!(validate_table_name("events").is_ok());
        assert!(validate_table_name("_staging_2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("2fast").is_err());
        assert!(validate_table_name("events; DROP TABLE x").is_err());
        assert!(validate_table_name("sqlite_master").is_err());
    }

    #[tokio::test]
    async fn test_rows_accumulate_across_workers() {
        let dir = TempDir::new().unwrap();
        let coordinator =
            Coordinator::new(ResourceLocation::new(dir.path().join("a.db")).unwrap());

        assert_eq!(execute(&options("a", 3), &coordinator).await.unwrap(), 3);
        assert_eq!(execute(&options("b", 2), &coordinator).await.unwrap(), 2);

        let per_worker: Vec<(String, i64)> = coordinator
            .run_shared(|conn| {
                Box::pin(async move {
                    let rows = sqlx::query(
                        "SELECT worker, COUNT(*) AS n FROM events GROUP BY worker ORDER BY worker",
                    )
                    .fetch_all(&mut *conn)
                    .await?;
                    Ok::<_, sqlx::Error>(
                        rows.iter()
                            .map(|row| (row.get("worker"), row.get("n")))
                            .collect(),
                    )
                })
            })
            .await
            .unwrap();

        assert_eq!(per_worker, vec![("a".to_string(), 3), ("b".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_invalid_table_takes_no_lock() {
        let dir = TempDir::new().unwrap();
        let location = ResourceLocation::new(dir.path().join("a.db")).unwrap();
        let coordinator = Coordinator::new(location.clone());

        let result = execute(
            &WriteRowsOptions {
                table: "bad name".to_string(),
                ..options("a", 1)
            },
            &coordinator,
        )
        .await;

        assert!(result.is_err());
        assert!(!location.lock_path().exists());
    }
}
