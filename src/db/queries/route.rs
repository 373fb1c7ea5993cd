//! Route database queries

use sqlx::PgPool;
use uuid::Uuid;

use crate::types::Route;

/// Upsert one chunk of routes by `(branch_code, name)`.
///
/// The latest import defines a route's rep roster, so `rep_codes` and
/// the distinct-rep figure are overwritten on conflict;
/// `import_batch_id` is only written on insert (rollback correctness).
pub async fn upsert_batch(
    pool: &PgPool,
    company_id: Uuid,
    batch_id: Uuid,
    routes: &[Route],
) -> Result<(), sqlx::Error> {
    if routes.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = routes.iter().map(|_| Uuid::new_v4()).collect();
    let branch_codes: Vec<&str> = routes.iter().map(|r| r.branch_code.as_str()).collect();
    let names: Vec<&str> = routes.iter().map(|r| r.name.as_str()).collect();
    let rep_codes: Vec<Option<&str>> = routes.iter().map(|r| r.rep_code.as_deref()).collect();
    let rep_rosters: Vec<serde_json::Value> = routes
        .iter()
        .map(|r| serde_json::json!(r.rep_codes))
        .collect();
    let rep_counts: Vec<i32> = routes
        .iter()
        .map(|r| r.distinct_rep_count() as i32)
        .collect();

    sqlx::query(
        r#"
        INSERT INTO routes (id, company_id, import_batch_id, branch_code, name,
            rep_code, rep_codes, distinct_rep_count, created_at, updated_at)
        SELECT u.id, $1, $2, u.branch_code, u.name, u.rep_code, u.rep_codes,
            u.distinct_rep_count, NOW(), NOW()
        FROM UNNEST($3::uuid[], $4::text[], $5::text[], $6::text[], $7::jsonb[],
            $8::int4[]) AS u(id, branch_code, name, rep_code, rep_codes, distinct_rep_count)
        ON CONFLICT (company_id, lower(branch_code), lower(name)) DO UPDATE SET
            rep_code = COALESCE(EXCLUDED.rep_code, routes.rep_code),
            rep_codes = EXCLUDED.rep_codes,
            distinct_rep_count = EXCLUDED.distinct_rep_count,
            updated_at = NOW()
        "#,
    )
    .bind(company_id)
    .bind(batch_id)
    .bind(&ids)
    .bind(&branch_codes)
    .bind(&names)
    .bind(&rep_codes)
    .bind(&rep_rosters)
    .bind(&rep_counts)
    .execute(pool)
    .await?;

    Ok(())
}

/// Remove every route row first inserted under this batch.
pub async fn delete_by_batch(
    pool: &PgPool,
    company_id: Uuid,
    batch_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM routes WHERE company_id = $1 AND import_batch_id = $2")
        .bind(company_id)
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
