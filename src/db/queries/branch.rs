//! Branch database queries

use sqlx::PgPool;
use uuid::Uuid;

use crate::types::Branch;

/// Upsert one chunk of branches by natural key.
///
/// `import_batch_id` is only written on insert: rows that existed
/// before the running batch keep their original tag, so rollback by
/// batch id removes exactly the rows this batch created.
pub async fn upsert_batch(
    pool: &PgPool,
    company_id: Uuid,
    batch_id: Uuid,
    branches: &[Branch],
) -> Result<(), sqlx::Error> {
    if branches.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = branches.iter().map(|_| Uuid::new_v4()).collect();
    let codes: Vec<&str> = branches.iter().map(|b| b.code.as_str()).collect();
    let names: Vec<&str> = branches.iter().map(|b| b.name.as_str()).collect();
    let regions: Vec<Option<&str>> = branches.iter().map(|b| b.region.as_deref()).collect();
    let actives: Vec<bool> = branches.iter().map(|b| b.is_active).collect();
    let lats: Vec<Option<f64>> = branches
        .iter()
        .map(|b| b.coordinates.map(|c| c.lat))
        .collect();
    let lngs: Vec<Option<f64>> = branches
        .iter()
        .map(|b| b.coordinates.map(|c| c.lng))
        .collect();

    sqlx::query(
        r#"
        INSERT INTO branches (id, company_id, import_batch_id, code, name, region,
            is_active, lat, lng, created_at, updated_at)
        SELECT u.id, $1, $2, u.code, u.name, u.region, u.is_active, u.lat, u.lng, NOW(), NOW()
        FROM UNNEST($3::uuid[], $4::text[], $5::text[], $6::text[], $7::bool[],
            $8::float8[], $9::float8[]) AS u(id, code, name, region, is_active, lat, lng)
        ON CONFLICT (company_id, lower(code)) DO UPDATE SET
            region = COALESCE(EXCLUDED.region, branches.region),
            is_active = EXCLUDED.is_active,
            lat = COALESCE(EXCLUDED.lat, branches.lat),
            lng = COALESCE(EXCLUDED.lng, branches.lng),
            updated_at = NOW()
        "#,
    )
    .bind(company_id)
    .bind(batch_id)
    .bind(&ids)
    .bind(&codes)
    .bind(&names)
    .bind(&regions)
    .bind(&actives)
    .bind(&lats)
    .bind(&lngs)
    .execute(pool)
    .await?;

    Ok(())
}

/// Remove every branch row first inserted under this batch.
pub async fn delete_by_batch(
    pool: &PgPool,
    company_id: Uuid,
    batch_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM branches WHERE company_id = $1 AND import_batch_id = $2")
        .bind(company_id)
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
