//! Write functions - persist uploads and staging rows to PostgreSQL

use crate::error::IngestError;
use crate::ingestion::parse::parse_source;
use crate::ingestion::types::{
    Delimiter, IngestStats, RawUpload, SourceType, StagingRow, StagingSnapshot, UploadRecord,
};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Rows per staging insert statement (3 binds each)
const STAGING_BATCH: usize = 10_000;

/// Ingest an upload: parse everything, then replace blob, record and staging rows in one transaction.
/// Any failure leaves the previous blob and staging rows in place.
pub async fn ingest(
    db: &PgPool,
    upload: RawUpload,
    delimiter: Delimiter,
) -> Result<IngestStats, IngestError> {
    let source = upload.source_type;
    info!("Ingesting {} ({} bytes)", upload.name, upload.content.len());

    let parsed = parse_source(source, &upload.content, delimiter)?;

    let mut tx = db.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO csv_storages (source_type, data_store, updated_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (source_type) DO UPDATE
        SET data_store = EXCLUDED.data_store, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(source.as_str())
    .bind(&upload.content)
    .bind(upload.uploaded_at)
    .execute(&mut *tx)
    .await?;

    let upload_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO csv_uploads (source_type, name, uploaded_at, row_count)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(source.as_str())
    .bind(&upload.name)
    .bind(upload.uploaded_at)
    .bind(parsed.rows.len() as i64)
    .fetch_one(&mut *tx)
    .await?;

    let deleted = sqlx::query("DELETE FROM staging_rows WHERE source_type = $1")
        .bind(source.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();
    debug!("Cleared {} staging rows for {}", deleted, source);

    for chunk in parsed.rows.chunks(STAGING_BATCH) {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO staging_rows (source_type, row_number, data) ");

        query.push_values(chunk, |mut b, (row_number, row)| {
            b.push_bind(source.as_str())
                .push_bind(*row_number as i32)
                .push_bind(Json(row));
        });

        query.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;

    info!("Upload {} (id: {}) complete: {}", upload.name, upload_id, parsed.stats);

    Ok(parsed.stats)
}

/// Delete an upload record. Deleting the latest upload of a type also clears
/// its stored blob and staging rows. Returns false when the id is unknown.
pub async fn delete_upload(db: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    let Some(source_type) =
        sqlx::query_scalar::<_, String>("SELECT source_type FROM csv_uploads WHERE id = $1")
            .bind(id)
            .fetch_optional(db)
            .await?
    else {
        return Ok(false);
    };

    let latest_id = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id FROM csv_uploads
        WHERE source_type = $1
        ORDER BY uploaded_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(&source_type)
    .fetch_one(db)
    .await?;

    let mut tx = db.begin().await?;

    if latest_id == id {
        sqlx::query("UPDATE csv_storages SET data_store = NULL, updated_at = NOW() WHERE source_type = $1")
            .bind(&source_type)
            .execute(&mut *tx)
            .await?;

        let cleared = sqlx::query("DELETE FROM staging_rows WHERE source_type = $1")
            .bind(&source_type)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        info!("Deleted latest {} upload; cleared {} staging rows", source_type, cleared);
    }

    sqlx::query("DELETE FROM csv_uploads WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(true)
}

/// Latest upload record of each source type
pub async fn latest_uploads(db: &PgPool) -> Result<Vec<UploadRecord>, sqlx::Error> {
    sqlx::query_as::<_, UploadRecord>(
        r#"
        SELECT DISTINCT ON (source_type) id, source_type, name, uploaded_at, row_count
        FROM csv_uploads
        ORDER BY source_type, uploaded_at DESC, id DESC
        "#,
    )
    .fetch_all(db)
    .await
}

/// Read every staging relation in file order
pub async fn load_staging(db: &PgPool) -> Result<StagingSnapshot, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT source_type, data FROM staging_rows ORDER BY source_type, row_number, id",
    )
    .fetch_all(db)
    .await?;

    let mut snapshot = StagingSnapshot::new();
    let mut unknown = 0;

    for row in rows {
        let source_type: String = row.try_get("source_type")?;
        let Json(data): Json<StagingRow> = row.try_get("data")?;

        match source_type.parse::<SourceType>() {
            Ok(source) => snapshot.push(source, data),
            Err(_) => unknown += 1,
        }
    }

    if unknown > 0 {
        warn!("Ignored {} staging rows with unknown source types", unknown);
    }

    Ok(snapshot)
}

/// True iff every registered source type has a non-empty active blob
pub fn all_sources_present(present: &[SourceType]) -> bool {
    let present: HashSet<&SourceType> = present.iter().collect();
    SourceType::ALL.iter().all(|source| present.contains(source))
}

pub async fn is_complete(db: &PgPool) -> Result<bool, sqlx::Error> {
    let stored = sqlx::query_scalar::<_, String>(
        "SELECT source_type FROM csv_storages WHERE data_store IS NOT NULL AND length(data_store) > 0",
    )
    .fetch_all(db)
    .await?;

    let present: Vec<SourceType> = stored.iter().filter_map(|s| s.parse().ok()).collect();
    let complete = all_sources_present(&present);

    if !complete {
        let missing: Vec<&str> = SourceType::ALL
            .iter()
            .filter(|s| !present.contains(*s))
            .map(SourceType::as_str)
            .collect();
        info!("Sources without an upload: {}", missing.join(", "));
    }

    Ok(complete)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completeness_all_but_one_then_all() {
        let (last, rest) = SourceType::ALL.split_last().unwrap();

        // All but one populated
        assert!(!all_sources_present(rest));

        // Last one arrives
        let mut all = rest.to_vec();
        all.push(*last);
        assert!(all_sources_present(&all));
    }

    #[test]
    fn test_completeness_ignores_duplicates() {
        let mut present = SourceType::ALL[1..].to_vec();
        present.push(SourceType::ALL[1]);
        assert!(!all_sources_present(&present));
        assert!(!all_sources_present(&[]));
    }
}
