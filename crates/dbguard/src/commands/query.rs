//! Query command implementation
//!
//! Runs one query and prints the rows, as tab-separated text or JSON.

use anyhow::Result;
use dbguard_core::Coordinator;
use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqliteConnection, SqliteRow},
    Column, Row, TypeInfo, ValueRef,
};

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub sql: String,
    /// Read-only session under a shared lock instead of an exclusive one
    pub shared: bool,
    pub json: bool,
}

/// Column names and decoded values, in result order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Rows as JSON objects keyed by column name.
    pub fn to_objects(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| self.columns.iter().cloned().zip(row.iter().cloned()).collect())
            .collect()
    }

    fn to_text(&self) -> String {
        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        if !self.columns.is_empty() {
            lines.push(self.columns.join("\t"));
        }
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(render_cell).collect();
            lines.push(cells.join("\t"));
        }
        lines.join("\n")
    }
}

/// Run the query under the requested lock mode.
///
/// # Errors
///
/// Returns the coordinator's error; invalid SQL is a `Work` error.
pub async fn execute(options: &QueryOptions, coordinator: &Coordinator) -> Result<QueryResult> {
    let sql = options.sql.clone();

    let result = if options.shared {
        coordinator
            .run_shared(move |conn| Box::pin(async move { fetch(conn, &sql).await }))
            .await?
    } else {
        // Exclusive sessions commit on success; a read-only query commits nothing
        coordinator
            .run_exclusive(move |conn| Box::pin(async move { fetch(conn, &sql).await }))
            .await?
    };

    Ok(result)
}

pub async fn run(options: &QueryOptions, coordinator: &Coordinator) -> Result<()> {
    let result = execute(options, coordinator).await?;
    tracing::debug!(rows = result.rows.len(), shared = options.shared, "Query finished");

    if options.json {
        println!("{}", serde_json::to_string_pretty(&result.to_objects())?);
    } else {
        let text = result.to_text();
        if !text.is_empty() {
            println!("{text}");
        }
    }
    Ok(())
}

async fn fetch(conn: &mut SqliteConnection, sql: &str) -> Result<QueryResult, sqlx::Error> {
    let rows = sqlx::query(sql).fetch_all(&mut *conn).await?;

    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let rows = rows
        .iter()
        .map(|row| {
            (0..row.len())
                .map(|i| decode_cell(row, i))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(QueryResult { columns, rows })
}

/// Decode by the storage class SQLite reports for the value itself.
fn decode_cell(row: &SqliteRow, index: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_string();

    match storage.as_str() {
        "INTEGER" => row.try_get::<i64, _>(index).map(Value::from),
        "REAL" => row.try_get::<f64, _>(index).map(Value::from),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).map(Value::from),
        _ => row.try_get::<String, _>(index).map(Value::from),
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
