//! Visit schedule database queries

use sqlx::PgPool;
use uuid::Uuid;

use crate::types::Visit;

/// Upsert one chunk of scheduled visits by
/// `(route_name, customer_key, week_number, day_name)`.
///
/// The unique index normalizes absent week/day (NULL week → 0, NULL
/// day → '') so repeated imports converge instead of piling up
/// NULL-keyed duplicates. Non-key fields: last import wins.
/// `import_batch_id` is only written on insert (rollback correctness).
pub async fn upsert_batch(
    pool: &PgPool,
    company_id: Uuid,
    batch_id: Uuid,
    visits: &[Visit],
) -> Result<(), sqlx::Error> {
    if visits.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = visits.iter().map(|_| Uuid::new_v4()).collect();
    let route_names: Vec<&str> = visits.iter().map(|v| v.route_name.as_str()).collect();
    let customer_keys: Vec<&str> = visits.iter().map(|v| v.customer_key.as_str()).collect();
    let weeks: Vec<Option<i32>> = visits.iter().map(|v| v.week_number).collect();
    let days: Vec<Option<&str>> = visits.iter().map(|v| v.day_name.as_deref()).collect();
    let orders: Vec<Option<i32>> = visits.iter().map(|v| v.visit_order).collect();
    let rep_codes: Vec<Option<&str>> = visits.iter().map(|v| v.rep_code.as_deref()).collect();

    sqlx::query(
        r#"
        INSERT INTO visits (id, company_id, import_batch_id, route_name, customer_key,
            week_number, day_name, visit_order, rep_code, created_at, updated_at)
        SELECT u.id, $1, $2, u.route_name, u.customer_key, u.week_number, u.day_name,
            u.visit_order, u.rep_code, NOW(), NOW()
        FROM UNNEST($3::uuid[], $4::text[], $5::text[], $6::int4[], $7::text[],
            $8::int4[], $9::text[])
            AS u(id, route_name, customer_key, week_number, day_name, visit_order, rep_code)
        ON CONFLICT (company_id, lower(route_name), customer_key,
            COALESCE(week_number, 0), COALESCE(lower(day_name), '')) DO UPDATE SET
            visit_order = EXCLUDED.visit_order,
            rep_code = EXCLUDED.rep_code,
            updated_at = NOW()
        "#,
    )
    .bind(company_id)
    .bind(batch_id)
    .bind(&ids)
    .bind(&route_names)
    .bind(&customer_keys)
    .bind(&weeks)
    .bind(&days)
    .bind(&orders)
    .bind(&rep_codes)
    .execute(pool)
    .await?;

    Ok(())
}

/// Remove every visit row first inserted under this batch.
pub async fn delete_by_batch(
    pool: &PgPool,
    company_id: Uuid,
    batch_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM visits WHERE company_id = $1 AND import_batch_id = $2")
        .bind(company_id)
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
