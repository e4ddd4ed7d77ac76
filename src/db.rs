//! Database helpers shared by the canonical store and the exporter

use crate::ingestion::types::{ColumnType, Value};
use anyhow::{Context, Result};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, Row};
use std::fmt::Display;

/// Open the primary pool and bring the schema up to date
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    Ok(pool)
}

/// Bind-parameter ceiling per statement
pub const MAX_BIND_PARAMS: usize = 65536;

/// Rows per multi-row insert so that rows x columns stays within the ceiling
pub fn rows_per_batch(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

/// Double-quote an identifier ("cross" and "type" are reserved words)
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Bind a value with the SQL type of its column; nulls stay typed
pub fn push_typed<Sep: Display>(
    b: &mut Separated<'_, '_, Postgres, Sep>,
    kind: ColumnType,
    value: &Value,
) {
    match kind {
        ColumnType::Text => b.push_bind(value.as_text().map(str::to_string)),
        ColumnType::Integer => b.push_bind(value.as_i64()),
        ColumnType::Float => b.push_bind(value.as_f64()),
        ColumnType::Boolean => b.push_bind(value.as_bool()),
    };
}

/// Read one column back into a `Value`
pub fn decode_typed(row: &PgRow, name: &str, kind: ColumnType) -> Result<Value, sqlx::Error> {
    let value = match kind {
        ColumnType::Text => row.try_get::<Option<String>, _>(name)?.map(Value::Text),
        ColumnType::Integer => row.try_get::<Option<i64>, _>(name)?.map(Value::Int),
        ColumnType::Float => row.try_get::<Option<f64>, _>(name)?.map(Value::Float),
        ColumnType::Boolean => row.try_get::<Option<bool>, _>(name)?.map(Value::Bool),
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_per_batch() {
        assert_eq!(rows_per_batch(87), 753);
        assert_eq!(rows_per_batch(1), 65536);
        assert_eq!(rows_per_batch(0), 65536);
        assert_eq!(rows_per_batch(100_000), 1);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("cross"), "\"cross\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
