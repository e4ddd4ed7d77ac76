//! Persist and reload the canonical table (data_csvs)

use crate::db::{decode_typed, push_typed, quote_ident, rows_per_batch};
use crate::merge::canonical::{CanonicalTable, Institution, CANONICAL_COLUMNS};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

fn column_list() -> String {
    CANONICAL_COLUMNS
        .iter()
        .map(|c| quote_ident(c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Replace the stored table with `table` in a single transaction
pub async fn replace_canonical(db: &PgPool, table: &CanonicalTable) -> Result<u64, sqlx::Error> {
    info!("Writing {} canonical rows to database", table.len());

    let mut tx = db.begin().await?;

    let deleted = sqlx::query("DELETE FROM data_csvs")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    debug!("Cleared {} canonical rows", deleted);

    sqlx::query("SELECT setval(pg_get_serial_sequence('data_csvs', 'id'), 1, false)")
        .execute(&mut *tx)
        .await?;

    let rows = table.by_institution();
    let columns = column_list();
    let mut inserted = 0;

    for chunk in rows.chunks(rows_per_batch(CANONICAL_COLUMNS.len())) {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO data_csvs ({}) ", columns));

        query.push_values(chunk, |mut b, institution| {
            for column in CANONICAL_COLUMNS {
                push_typed(&mut b, column.kind, institution.get(column.name));
            }
        });

        inserted += query.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;

    info!("Canonical write complete: {} rows", inserted);

    Ok(inserted)
}

/// Load the stored canonical table
pub async fn load_canonical(db: &PgPool) -> Result<CanonicalTable, sqlx::Error> {
    let rows = sqlx::query(&format!("SELECT {} FROM data_csvs ORDER BY id", column_list()))
        .fetch_all(db)
        .await?;

    let mut table = CanonicalTable::new();

    for row in rows {
        let mut institution = Institution::new();
        for column in CANONICAL_COLUMNS {
            let value = decode_typed(&row, column.name, column.kind)?;
            institution
                .set(column.name, value)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        }
        table
            .insert(institution)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    }

    debug!("Loaded {} canonical rows", table.len());

    Ok(table)
}
