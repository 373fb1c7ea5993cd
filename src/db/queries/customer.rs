//! Customer database queries

use sqlx::PgPool;
use uuid::Uuid;

use crate::types::Customer;

/// Upsert one chunk of customers by `(branch_code, customer_key)`.
///
/// Optional fields follow "new wins when present": a later import can
/// fill or refresh a field but never null out an existing value.
/// `import_batch_id` is only written on insert (rollback correctness).
pub async fn upsert_batch(
    pool: &PgPool,
    company_id: Uuid,
    batch_id: Uuid,
    customers: &[Customer],
) -> Result<(), sqlx::Error> {
    if customers.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = customers.iter().map(|_| Uuid::new_v4()).collect();
    let keys: Vec<&str> = customers.iter().map(|c| c.key.as_str()).collect();
    let key_sources: Vec<&str> = customers.iter().map(|c| c.key_source.as_str()).collect();
    let branch_codes: Vec<&str> = customers.iter().map(|c| c.branch_code.as_str()).collect();
    let client_codes: Vec<Option<&str>> =
        customers.iter().map(|c| c.client_code.as_deref()).collect();
    let reach_codes: Vec<Option<&str>> = customers
        .iter()
        .map(|c| c.reach_customer_code.as_deref())
        .collect();
    let names_en: Vec<&str> = customers.iter().map(|c| c.name_en.as_str()).collect();
    let names_ar: Vec<Option<&str>> = customers.iter().map(|c| c.name_ar.as_deref()).collect();
    let lats: Vec<Option<f64>> = customers.iter().map(|c| c.lat).collect();
    let lngs: Vec<Option<f64>> = customers.iter().map(|c| c.lng).collect();
    let addresses: Vec<Option<&str>> = customers.iter().map(|c| c.address.as_deref()).collect();
    let phones: Vec<Option<&str>> = customers.iter().map(|c| c.phone.as_deref()).collect();
    let classifications: Vec<Option<&str>> = customers
        .iter()
        .map(|c| c.classification.as_deref())
        .collect();
    let vats: Vec<Option<&str>> = customers.iter().map(|c| c.vat.as_deref()).collect();
    let districts: Vec<Option<&str>> = customers.iter().map(|c| c.district.as_deref()).collect();
    let buyer_ids: Vec<Option<&str>> = customers.iter().map(|c| c.buyer_id.as_deref()).collect();
    let store_types: Vec<Option<&str>> =
        customers.iter().map(|c| c.store_type.as_deref()).collect();

    sqlx::query(
        r#"
        INSERT INTO customers (id, company_id, import_batch_id, customer_key, key_source,
            branch_code, client_code, reach_customer_code, name_en, name_ar, lat, lng,
            address, phone, classification, vat, district, buyer_id, store_type,
            created_at, updated_at)
        SELECT u.id, $1, $2, u.customer_key, u.key_source, u.branch_code, u.client_code,
            u.reach_customer_code, u.name_en, u.name_ar, u.lat, u.lng, u.address, u.phone,
            u.classification, u.vat, u.district, u.buyer_id, u.store_type, NOW(), NOW()
        FROM UNNEST($3::uuid[], $4::text[], $5::text[], $6::text[], $7::text[], $8::text[],
            $9::text[], $10::text[], $11::float8[], $12::float8[], $13::text[], $14::text[],
            $15::text[], $16::text[], $17::text[], $18::text[], $19::text[])
            AS u(id, customer_key, key_source, branch_code, client_code, reach_customer_code,
                 name_en, name_ar, lat, lng, address, phone, classification, vat, district,
                 buyer_id, store_type)
        ON CONFLICT (company_id, lower(branch_code), customer_key) DO UPDATE SET
            key_source = EXCLUDED.key_source,
            client_code = COALESCE(EXCLUDED.client_code, customers.client_code),
            reach_customer_code = COALESCE(EXCLUDED.reach_customer_code, customers.reach_customer_code),
            name_en = EXCLUDED.name_en,
            name_ar = COALESCE(EXCLUDED.name_ar, customers.name_ar),
            lat = COALESCE(EXCLUDED.lat, customers.lat),
            lng = COALESCE(EXCLUDED.lng, customers.lng),
            address = COALESCE(EXCLUDED.address, customers.address),
            phone = COALESCE(EXCLUDED.phone, customers.phone),
            classification = COALESCE(EXCLUDED.classification, customers.classification),
            vat = COALESCE(EXCLUDED.vat, customers.vat),
            district = COALESCE(EXCLUDED.district, customers.district),
            buyer_id = COALESCE(EXCLUDED.buyer_id, customers.buyer_id),
            store_type = COALESCE(EXCLUDED.store_type, customers.store_type),
            updated_at = NOW()
        "#,
    )
    .bind(company_id)
    .bind(batch_id)
    .bind(&ids)
    .bind(&keys)
    .bind(&key_sources)
    .bind(&branch_codes)
    .bind(&client_codes)
    .bind(&reach_codes)
    .bind(&names_en)
    .bind(&names_ar)
    .bind(&lats)
    .bind(&lngs)
    .bind(&addresses)
    .bind(&phones)
    .bind(&classifications)
    .bind(&vats)
    .bind(&districts)
    .bind(&buyer_ids)
    .bind(&store_types)
    .execute(pool)
    .await?;

    Ok(())
}

/// Remove every customer row first inserted under this batch.
pub async fn delete_by_batch(
    pool: &PgPool,
    company_id: Uuid,
    batch_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM customers WHERE company_id = $1 AND import_batch_id = $2")
            .bind(company_id)
            .bind(batch_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}
