//! Tenant import history queries

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::types::HistoryLogEntry;

/// Append a history entry. Called on successful completion only.
pub async fn append(
    pool: &PgPool,
    company_id: Uuid,
    entry: &HistoryLogEntry,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO import_history (id, company_id, file_name, upload_date,
            record_count, uploader, entry_type, stats)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(company_id)
    .bind(&entry.file_name)
    .bind(entry.upload_date)
    .bind(entry.record_count as i32)
    .bind(&entry.uploader)
    .bind(&entry.entry_type)
    .bind(serde_json::json!(entry.stats))
    .execute(pool)
    .await?;
    Ok(())
}

/// Recent history for one tenant, newest first.
pub async fn list_for_company(
    pool: &PgPool,
    company_id: Uuid,
    limit: i64,
) -> Result<Vec<HistoryLogEntry>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, file_name, upload_date, record_count, uploader, entry_type, stats
        FROM import_history
        WHERE company_id = $1
        ORDER BY upload_date DESC
        LIMIT $2
        "#,
    )
    .bind(company_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let stats: serde_json::Value = row.try_get("stats")?;
        let record_count: i32 = row.try_get("record_count")?;
        entries.push(HistoryLogEntry {
            id: row.try_get("id")?,
            file_name: row.try_get("file_name")?,
            upload_date: row.try_get("upload_date")?,
            record_count: record_count as usize,
            uploader: row.try_get("uploader")?,
            entry_type: row.try_get("entry_type")?,
            stats: serde_json::from_value(stats).unwrap_or_default(),
        });
    }
    Ok(entries)
}
