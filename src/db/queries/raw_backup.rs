//! Raw snapshot queries
//!
//! The append-only copy of every upload, written before normalization
//! and never rolled back — the basis of manual recovery when a mapping
//! turns out to be wrong.

use sqlx::PgPool;
use uuid::Uuid;

use crate::types::RawRow;

/// Append one chunk of raw rows to the per-tenant snapshot log.
pub async fn insert_batch(
    pool: &PgPool,
    company_id: Uuid,
    batch_id: Uuid,
    file_name: &str,
    rows: &[RawRow],
) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = rows.iter().map(|_| Uuid::new_v4()).collect();
    let row_numbers: Vec<i32> = rows.iter().map(|r| r.row_number as i32).collect();
    let payloads: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| serde_json::json!(r.cells))
        .collect();

    sqlx::query(
        r#"
        INSERT INTO raw_upload_rows (id, company_id, import_batch_id, file_name,
            row_number, payload, created_at)
        SELECT u.id, $1, $2, $3, u.row_number, u.payload, NOW()
        FROM UNNEST($4::uuid[], $5::int4[], $6::jsonb[]) AS u(id, row_number, payload)
        "#,
    )
    .bind(company_id)
    .bind(batch_id)
    .bind(file_name)
    .bind(&ids)
    .bind(&row_numbers)
    .bind(&payloads)
    .execute(pool)
    .await?;

    Ok(())
}
