//! Import batch lifecycle queries

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::types::{ImportBatch, ImportStatus, PerEntityCounts};

/// Persist a new batch row when the operator confirms a mapping.
pub async fn create(pool: &PgPool, batch: &ImportBatch) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO import_batches (id, company_id, file_name, raw_row_count,
            started_at, status, per_entity_counts)
        VALUES ($1, $2, $3, $4, $5, $6, NULL)
        "#,
    )
    .bind(batch.id)
    .bind(batch.company_id)
    .bind(&batch.file_name)
    .bind(batch.raw_row_count as i32)
    .bind(batch.started_at)
    .bind(batch.status.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

/// Update the batch status, with final counts once known.
pub async fn update_status(
    pool: &PgPool,
    batch_id: Uuid,
    status: ImportStatus,
    counts: Option<PerEntityCounts>,
) -> Result<(), sqlx::Error> {
    let counts_json = counts.map(|c| serde_json::json!(c));
    sqlx::query(
        r#"
        UPDATE import_batches
        SET status = $2,
            per_entity_counts = COALESCE($3, per_entity_counts),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(batch_id)
    .bind(status.as_str())
    .bind(counts_json)
    .execute(pool)
    .await?;
    Ok(())
}

/// Whether the tenant already has a non-terminal batch. Backs the
/// one-import-per-tenant guard across worker restarts.
pub async fn has_active(pool: &PgPool, company_id: Uuid) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM import_batches
            WHERE company_id = $1 AND status IN ('pending', 'processing')
        ) AS active
        "#,
    )
    .bind(company_id)
    .fetch_one(pool)
    .await?;
    row.try_get("active")
}
