//! Partitioned bulk load of the canonical table into the downstream store
//!
//! The target schema is read at call time, values are coerced to the target
//! column kinds, and rows are inserted in batches that stay under the bind
//! parameter ceiling. Each batch commits on its own.

use crate::config::TargetConfig;
use crate::db::{push_typed, quote_ident, rows_per_batch};
use crate::error::LoadError;
use crate::ingestion::types::{ColumnType, Value};
use crate::merge::canonical::{CanonicalTable, Institution};
use serde::Serialize;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::ops::Range;
use tracing::{debug, info, warn};

/// Tokens loaded as `true` into boolean target columns
const TRUE_TOKENS: [&str; 6] = ["true", "t", "yes", "y", "1", "on"];

/// Columns managed by the target itself
const MANAGED_COLUMNS: [&str; 3] = ["id", "created_at", "updated_at"];
const TIMESTAMP_COLUMNS: [&str; 2] = ["created_at", "updated_at"];

/// A column of a target table, as introspected
#[derive(Debug, Clone, PartialEq)]
pub struct TargetColumn {
    pub name: String,
    pub kind: ColumnType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetSchema {
    pub table: String,
    /// Loadable columns, in table order
    pub columns: Vec<TargetColumn>,
    /// Timestamp columns present on the table, filled with now()
    pub timestamps: Vec<&'static str>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct LoadStats {
    pub rows: usize,
    pub batches: usize,
    pub institution_types: usize,
}

impl std::fmt::Display for LoadStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rows: {}, batches: {}, institution types: {}",
            self.rows, self.batches, self.institution_types
        )
    }
}

fn kind_of(data_type: &str) -> ColumnType {
    match data_type {
        "smallint" | "integer" | "bigint" => ColumnType::Integer,
        "real" | "double precision" | "numeric" => ColumnType::Float,
        "boolean" => ColumnType::Boolean,
        _ => ColumnType::Text,
    }
}

impl TargetSchema {
    /// Build from (column_name, data_type) pairs; `skip` names further columns to leave out
    pub fn from_columns(table: &str, columns: Vec<(String, String)>, skip: &[&str]) -> Self {
        let timestamps = TIMESTAMP_COLUMNS
            .into_iter()
            .filter(|t| columns.iter().any(|(name, _)| name == t))
            .collect();

        let columns = columns
            .into_iter()
            .filter(|(name, _)| !MANAGED_COLUMNS.contains(&name.as_str()) && !skip.contains(&name.as_str()))
            .map(|(name, data_type)| TargetColumn {
                kind: kind_of(&data_type),
                name,
            })
            .collect();

        TargetSchema {
            table: table.to_string(),
            columns,
            timestamps,
        }
    }

    fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .chain(self.timestamps.iter().map(|t| quote_ident(t)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Read the column names and types of a target table
pub async fn introspect(conn: &mut PgConnection, table: &str, skip: &[&str]) -> Result<TargetSchema, LoadError> {
    let columns: Vec<(String, String)> = sqlx::query_as(
        "SELECT column_name::text, data_type::text FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 \
         ORDER BY ordinal_position",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await
    .map_err(LoadError::Connection)?;

    if columns.is_empty() {
        return Err(LoadError::Schema {
            table: table.to_string(),
            reason: "table not found".to_string(),
        });
    }

    Ok(TargetSchema::from_columns(table, columns, skip))
}

/// Row ranges for `rows` records of `columns` bound values each
pub fn partition_rows(rows: usize, columns: usize) -> Vec<Range<usize>> {
    let batch = rows_per_batch(columns);
    (0..rows.div_ceil(batch))
        .map(|i| i * batch..((i + 1) * batch).min(rows))
        .collect()
}

/// Leading integer of a string, 0 when there is none
fn leading_int(text: &str) -> i64 {
    let text = text.trim_start();
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, text.strip_prefix('+').unwrap_or(text)),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

/// Convert a canonical value to the kind of its target column
pub fn coerce(value: &Value, kind: ColumnType) -> Value {
    match kind {
        ColumnType::Integer => Value::Int(match value {
            Value::Null => 0,
            Value::Bool(b) => i64::from(*b),
            Value::Int(i) => *i,
            Value::Float(f) => *f as i64,
            Value::Text(s) => leading_int(s),
        }),
        ColumnType::Float => Value::Float(match value {
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            Value::Text(s) => s.trim().parse().unwrap_or(0.0),
        }),
        ColumnType::Text => match value {
            Value::Null => Value::Null,
            other => Value::Text(other.to_string()),
        },
        ColumnType::Boolean => match value {
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Bool(*b),
            other => {
                let token = other.to_string().trim().to_lowercase();
                Value::Bool(TRUE_TOKENS.contains(&token.as_str()))
            }
        },
    }
}

/// Source value for a target column: `ope` carries ope6, `institution_type_id`
/// comes from the dimension, everything else by name
fn source_value(institution: &Institution, column: &str, types: &HashMap<String, i64>) -> Value {
    match column {
        "ope" => institution.get("ope6").clone(),
        "institution_type_id" => institution
            .text("type")
            .and_then(|t| types.get(t))
            .map(|id| Value::Int(*id))
            .unwrap_or(Value::Null),
        name if crate::merge::canonical::column(name).is_some() => institution.get(name).clone(),
        _ => Value::Null,
    }
}

/// Target row for one canonical row, in schema column order
pub fn target_row(institution: &Institution, schema: &TargetSchema, types: &HashMap<String, i64>) -> Vec<Value> {
    schema
        .columns
        .iter()
        .map(|c| coerce(&source_value(institution, &c.name, types), c.kind))
        .collect()
}

/// Replace the category table with one row per distinct institution type
pub async fn build_dimension(
    conn: &mut PgConnection,
    table_name: &str,
    table: &CanonicalTable,
) -> Result<HashMap<String, i64>, LoadError> {
    let schema = introspect(conn, table_name, &[]).await?;
    if !schema.columns.iter().any(|c| c.name == "name") {
        return Err(LoadError::Schema {
            table: table_name.to_string(),
            reason: "no name column".to_string(),
        });
    }

    let mut columns = vec![quote_ident("name")];
    columns.extend(schema.timestamps.iter().map(|t| quote_ident(t)));
    let now = ", now()".repeat(schema.timestamps.len());
    let insert = format!(
        "INSERT INTO {} ({}) VALUES ($1{}) RETURNING id::bigint",
        quote_ident(table_name),
        columns.join(", "),
        now
    );

    let mut tx = conn.begin().await.map_err(LoadError::Connection)?;

    sqlx::query(&format!("DELETE FROM {}", quote_ident(table_name)))
        .execute(&mut *tx)
        .await
        .map_err(LoadError::Connection)?;

    let mut ids = HashMap::new();
    for name in table.distinct("type") {
        let id: i64 = sqlx::query_scalar(&insert)
            .bind(&name)
            .fetch_one(&mut *tx)
            .await
            .map_err(LoadError::Connection)?;
        ids.insert(name, id);
    }

    tx.commit().await.map_err(LoadError::Connection)?;

    debug!("Loaded {} institution types", ids.len());

    Ok(ids)
}

async fn insert_batch(
    conn: &mut PgConnection,
    schema: &TargetSchema,
    rows: &[&Institution],
    types: &HashMap<String, i64>,
    first: bool,
) -> Result<u64, sqlx::Error> {
    let table = quote_ident(&schema.table);
    let mut tx = conn.begin().await?;

    if first {
        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT setval(pg_get_serial_sequence($1, 'id'), 1, false)")
            .bind(&schema.table)
            .execute(&mut *tx)
            .await?;
    }

    let mut query: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("INSERT INTO {} ({}) ", table, schema.column_list()));

    query.push_values(rows, |mut b, institution| {
        for (column, value) in schema.columns.iter().zip(target_row(institution, schema, types)) {
            push_typed(&mut b, column.kind, &value);
        }
        for _ in &schema.timestamps {
            b.push("now()");
        }
    });

    let inserted = query.build().execute(&mut *tx).await?.rows_affected();
    tx.commit().await?;

    Ok(inserted)
}

async fn load(conn: &mut PgConnection, target: &TargetConfig, table: &CanonicalTable) -> Result<LoadStats, LoadError> {
    let schema = introspect(conn, &target.institutions_table, &["type"]).await?;
    let types = build_dimension(conn, &target.institution_types_table, table).await?;

    let rows = table.by_institution();
    let batches = partition_rows(rows.len(), schema.columns.len());
    info!(
        "Loading {} rows into {} in {} batches",
        rows.len(),
        schema.table,
        batches.len()
    );

    let mut stats = LoadStats {
        institution_types: types.len(),
        ..LoadStats::default()
    };

    for (batch_index, range) in batches.into_iter().enumerate() {
        let inserted = insert_batch(conn, &schema, &rows[range], &types, batch_index == 0)
            .await
            .map_err(|cause| LoadError::Batch { batch_index, cause })?;

        debug!("Batch {} committed: {} rows", batch_index, inserted);
        stats.rows += inserted as usize;
        stats.batches += 1;
    }

    Ok(stats)
}

/// Push the canonical table to the target store over a dedicated connection
pub async fn bulk_load(target: &TargetConfig, table: &CanonicalTable) -> Result<LoadStats, LoadError> {
    let mut conn = PgConnection::connect(&target.database_url)
        .await
        .map_err(LoadError::Connection)?;

    let result = load(&mut conn, target, table).await;

    if let Err(e) = conn.close().await {
        warn!("Failed to close target connection: {}", e);
    }

    match &result {
        Ok(stats) => info!("Bulk load complete: {}", stats),
        Err(e) => warn!("Bulk load aborted: {}", e),
    }

    result
}
