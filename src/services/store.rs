//! Storage contract for the persistence orchestrator
//!
//! The pipeline needs exactly three things from the backing store:
//! conditional upsert by natural key, batch insert of the raw snapshot,
//! and rollback of one bounded batch by its id. `EntityStore` is that
//! seam; Postgres implements it through the `db::queries` modules and
//! tests substitute an in-memory store.

use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::db::queries;
use crate::types::{Branch, Customer, RawRow, Route, Visit};

/// The four normalized entity tables, in write order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Branches,
    Routes,
    Customers,
    Visits,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Branches,
        EntityKind::Routes,
        EntityKind::Customers,
        EntityKind::Visits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Branches => "branches",
            EntityKind::Routes => "routes",
            EntityKind::Customers => "customers",
            EntityKind::Visits => "visits",
        }
    }
}

/// Write failures, split by whether a retry can help.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network/lock/timeout class: retried with backoff.
    #[error("transient store error: {0}")]
    Transient(anyhow::Error),
    /// Structural failure (constraint violation, bad statement):
    /// retrying cannot succeed.
    #[error("store error: {0}")]
    Fatal(anyhow::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Classify a sqlx error. Serialization failures, deadlocks and lock
/// timeouts resolve on retry; everything else is structural.
fn classify(err: sqlx::Error) -> StoreError {
    let transient = match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("40001") | Some("40P01") | Some("55P03") | Some("57014")
        ),
        _ => false,
    };
    if transient {
        StoreError::Transient(anyhow!(err))
    } else {
        StoreError::Fatal(anyhow!(err))
    }
}

/// Store operations the orchestrator is written against.
///
/// Every write stamps `company_id` and `import_batch_id` on each row;
/// rollback is one delete-by-batch-id per entity table.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Append raw rows to the per-tenant snapshot log. Never rolled
    /// back — this copy is the basis of manual recovery.
    async fn backup_raw_rows(
        &self,
        company_id: Uuid,
        batch_id: Uuid,
        file_name: &str,
        rows: &[RawRow],
    ) -> Result<(), StoreError>;

    async fn upsert_branches(
        &self,
        company_id: Uuid,
        batch_id: Uuid,
        branches: &[Branch],
    ) -> Result<(), StoreError>;

    async fn upsert_routes(
        &self,
        company_id: Uuid,
        batch_id: Uuid,
        routes: &[Route],
    ) -> Result<(), StoreError>;

    async fn upsert_customers(
        &self,
        company_id: Uuid,
        batch_id: Uuid,
        customers: &[Customer],
    ) -> Result<(), StoreError>;

    async fn upsert_visits(
        &self,
        company_id: Uuid,
        batch_id: Uuid,
        visits: &[Visit],
    ) -> Result<(), StoreError>;

    /// Delete every row of one entity table first inserted under the
    /// given batch id. Returns the number of rows removed.
    async fn delete_batch_rows(
        &self,
        entity: EntityKind,
        company_id: Uuid,
        batch_id: Uuid,
    ) -> Result<u64, StoreError>;
}

/// Postgres-backed store used in production.
#[derive(Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn backup_raw_rows(
        &self,
        company_id: Uuid,
        batch_id: Uuid,
        file_name: &str,
        rows: &[RawRow],
    ) -> Result<(), StoreError> {
        queries::raw_backup::insert_batch(&self.pool, company_id, batch_id, file_name, rows)
            .await
            .map_err(classify)
    }

    async fn upsert_branches(
        &self,
        company_id: Uuid,
        batch_id: Uuid,
        branches: &[Branch],
    ) -> Result<(), StoreError> {
        queries::branch::upsert_batch(&self.pool, company_id, batch_id, branches)
            .await
            .map_err(classify)
    }

    async fn upsert_routes(
        &self,
        company_id: Uuid,
        batch_id: Uuid,
        routes: &[Route],
    ) -> Result<(), StoreError> {
        queries::route::upsert_batch(&self.pool, company_id, batch_id, routes)
            .await
            .map_err(classify)
    }

    async fn upsert_customers(
        &self,
        company_id: Uuid,
        batch_id: Uuid,
        customers: &[Customer],
    ) -> Result<(), StoreError> {
        queries::customer::upsert_batch(&self.pool, company_id, batch_id, customers)
            .await
            .map_err(classify)
    }

    async fn upsert_visits(
        &self,
        company_id: Uuid,
        batch_id: Uuid,
        visits: &[Visit],
    ) -> Result<(), StoreError> {
        queries::visit::upsert_batch(&self.pool, company_id, batch_id, visits)
            .await
            .map_err(classify)
    }

    async fn delete_batch_rows(
        &self,
        entity: EntityKind,
        company_id: Uuid,
        batch_id: Uuid,
    ) -> Result<u64, StoreError> {
        let result = match entity {
            EntityKind::Branches => {
                queries::branch::delete_by_batch(&self.pool, company_id, batch_id).await
            }
            EntityKind::Routes => {
                queries::route::delete_by_batch(&self.pool, company_id, batch_id).await
            }
            EntityKind::Customers => {
                queries::customer::delete_by_batch(&self.pool, company_id, batch_id).await
            }
            EntityKind::Visits => {
                queries::visit::delete_by_batch(&self.pool, company_id, batch_id).await
            }
        };
        result.map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_order_matches_write_order() {
        let names: Vec<&str> = EntityKind::ALL.iter().map(|e| e.as_str()).collect();
        assert_eq!(names, vec!["branches", "routes", "customers", "visits"]);
    }

    #[test]
    fn test_classify_pool_timeout_as_transient() {
        assert!(classify(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn test_classify_row_not_found_as_fatal() {
        assert!(!classify(sqlx::Error::RowNotFound).is_transient());
    }
}
