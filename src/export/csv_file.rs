//! Fixed-column CSV export of the canonical table

use crate::ingestion::types::Value;
use crate::merge::canonical::{CanonicalTable, Column, Institution, CANONICAL_COLUMNS};
use anyhow::{Context, Result};

/// Export columns: every canonical column except the internal `ope6`
pub fn export_columns() -> impl Iterator<Item = &'static Column> {
    CANONICAL_COLUMNS.iter().filter(|c| c.name != "ope6")
}

fn render(column: &Column, value: &Value) -> String {
    match (column.name, value) {
        (_, Value::Null) | (_, Value::Bool(false)) => String::new(),
        ("ope", Value::Text(ope)) => format!("'{}'", ope),
        ("type", Value::Text(kind)) => kind.to_uppercase(),
        (_, other) => other.to_string(),
    }
}

fn record(institution: &Institution) -> Vec<String> {
    export_columns()
        .map(|column| render(column, institution.get(column.name)))
        .collect()
}

/// Render the table with a header line, rows ordered by institution name
pub fn to_csv(table: &CanonicalTable) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer
        .write_record(export_columns().map(|c| c.name))
        .context("Failed to write CSV header")?;

    for institution in table.by_institution() {
        writer
            .write_record(record(institution))
            .with_context(|| format!("Failed to write row for {}", institution.facility_code()))?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV export: {}", e.error()))
}
