//! Persistence orchestrator
//!
//! Executes the dual-write for one confirmed import: the raw snapshot
//! first, then the four entity syncs in fixed order — branches, routes,
//! customers, visits. Routes reference branch codes and visits
//! reference route and customer keys, so entities are never written in
//! parallel with each other; within one entity, rows are chunked and
//! written with bounded concurrency.
//!
//! Progress is emitted as immutable snapshots on a channel, one per
//! completed chunk. Cancellation is cooperative: the token is polled
//! before each chunk is launched, never mid-write, and in-flight writes
//! are always drained before the step reports its outcome. Rollback is
//! data-driven — every entity row is stamped with the batch id, so
//! undoing a batch is one delete-by-batch-id per table, in reverse
//! entity order.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::entity_extractor::ExtractedEntities;
use crate::services::store::{EntityKind, EntityStore, StoreError};
use crate::types::{
    ImportBatch, ImportError, ImportStatus, ImportStep, PerEntityCounts, ProgressEvent, RawRow,
    RollbackOutcome,
};

pub const DEFAULT_CHUNK_SIZE: usize = 250;
pub const DEFAULT_WRITE_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_WRITE_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Step failure, before it is mapped to the public error taxonomy.
enum StepError {
    Cancelled,
    Fatal(String),
}

pub struct Orchestrator {
    store: Arc<dyn EntityStore>,
    chunk_size: usize,
    write_concurrency: usize,
    max_write_retries: u32,
    retry_base_delay: Duration,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            chunk_size: DEFAULT_CHUNK_SIZE,
            write_concurrency: DEFAULT_WRITE_CONCURRENCY,
            max_write_retries: DEFAULT_MAX_WRITE_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }

    pub fn with_tuning(
        mut self,
        chunk_size: usize,
        write_concurrency: usize,
        max_write_retries: u32,
    ) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.write_concurrency = write_concurrency.max(1);
        self.max_write_retries = max_write_retries;
        self
    }

    #[cfg(test)]
    fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Run the full dual-write for one batch.
    ///
    /// On success the batch is `Complete` and the per-entity counts are
    /// returned. On cancellation or fatal write failure everything
    /// inserted under this batch id is rolled back — except the raw
    /// snapshot, which is never reverted — and the batch lands in
    /// `Cancelled`/`Error`.
    pub async fn run(
        &self,
        batch: &mut ImportBatch,
        raw_rows: &[RawRow],
        entities: &ExtractedEntities,
        progress: &UnboundedSender<ProgressEvent>,
        cancel: &CancellationToken,
    ) -> Result<PerEntityCounts, ImportError> {
        batch.status = ImportStatus::Processing;
        info!(
            "import batch {} started: {} raw rows, {} branches, {} routes, {} customers, {} visits",
            batch.id,
            raw_rows.len(),
            entities.branches.len(),
            entities.routes.len(),
            entities.customers.len(),
            entities.visits.len()
        );

        let company_id = batch.company_id;
        let batch_id = batch.id;

        let raw_writer = {
            let store = Arc::clone(&self.store);
            let file_name = batch.file_name.clone();
            move |chunk: Vec<RawRow>| -> BoxFuture<'static, Result<(), StoreError>> {
                let store = Arc::clone(&store);
                let file_name = file_name.clone();
                async move {
                    store
                        .backup_raw_rows(company_id, batch_id, &file_name, &chunk)
                        .await
                }
                .boxed()
            }
        };
        if let Err(err) = self
            .write_step(ImportStep::RawBackup, raw_rows, raw_writer, progress, cancel)
            .await
        {
            return Err(self.abort(batch, ImportStep::RawBackup, err).await);
        }

        let branch_writer = {
            let store = Arc::clone(&self.store);
            move |chunk: Vec<crate::types::Branch>| -> BoxFuture<'static, Result<(), StoreError>> {
                let store = Arc::clone(&store);
                async move { store.upsert_branches(company_id, batch_id, &chunk).await }.boxed()
            }
        };
        if let Err(err) = self
            .write_step(ImportStep::Branches, &entities.branches, branch_writer, progress, cancel)
            .await
        {
            return Err(self.abort(batch, ImportStep::Branches, err).await);
        }

        let route_writer = {
            let store = Arc::clone(&self.store);
            move |chunk: Vec<crate::types::Route>| -> BoxFuture<'static, Result<(), StoreError>> {
                let store = Arc::clone(&store);
                async move { store.upsert_routes(company_id, batch_id, &chunk).await }.boxed()
            }
        };
        if let Err(err) = self
            .write_step(ImportStep::Routes, &entities.routes, route_writer, progress, cancel)
            .await
        {
            return Err(self.abort(batch, ImportStep::Routes, err).await);
        }

        let customer_writer = {
            let store = Arc::clone(&self.store);
            move |chunk: Vec<crate::types::Customer>| -> BoxFuture<'static, Result<(), StoreError>> {
                let store = Arc::clone(&store);
                async move { store.upsert_customers(company_id, batch_id, &chunk).await }.boxed()
            }
        };
        if let Err(err) = self
            .write_step(
                ImportStep::Customers,
                &entities.customers,
                customer_writer,
                progress,
                cancel,
            )
            .await
        {
            return Err(self.abort(batch, ImportStep::Customers, err).await);
        }

        let visit_writer = {
            let store = Arc::clone(&self.store);
            move |chunk: Vec<crate::types::Visit>| -> BoxFuture<'static, Result<(), StoreError>> {
                let store = Arc::clone(&store);
                async move { store.upsert_visits(company_id, batch_id, &chunk).await }.boxed()
            }
        };
        if let Err(err) = self
            .write_step(ImportStep::Visits, &entities.visits, visit_writer, progress, cancel)
            .await
        {
            return Err(self.abort(batch, ImportStep::Visits, err).await);
        }

        let counts = PerEntityCounts {
            branches: entities.branches.len(),
            routes: entities.routes.len(),
            customers: entities.customers.len(),
            visits: entities.visits.len(),
        };
        batch.status = ImportStatus::Complete;
        batch.per_entity_counts = Some(counts);
        info!("import batch {} complete: {:?}", batch.id, counts);
        Ok(counts)
    }

    /// Write one step in chunks with bounded concurrency.
    ///
    /// The cancellation token is polled before each chunk launch. A
    /// failed or cancelled step never abandons in-flight writes — they
    /// are drained first, so no write is aborted mid-flight.
    async fn write_step<T, W>(
        &self,
        step: ImportStep,
        items: &[T],
        write: W,
        progress: &UnboundedSender<ProgressEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), StepError>
    where
        T: Clone + Send + Sync + 'static,
        W: Fn(Vec<T>) -> BoxFuture<'static, Result<(), StoreError>> + Clone + Send + Sync + 'static,
    {
        let total = items.len();
        if total == 0 {
            let _ = progress.send(ProgressEvent::new(step, 0, 0));
            return if cancel.is_cancelled() {
                Err(StepError::Cancelled)
            } else {
                Ok(())
            };
        }

        let mut pending = items
            .chunks(self.chunk_size)
            .map(|c| c.to_vec())
            .collect::<Vec<_>>()
            .into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut written = 0usize;
        let mut cancelled = false;
        let mut fatal: Option<String> = None;

        loop {
            while !cancelled && fatal.is_none() && in_flight.len() < self.write_concurrency {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                match pending.next() {
                    Some(chunk) => {
                        let chunk_len = chunk.len();
                        let write = write.clone();
                        let max_retries = self.max_write_retries;
                        let base_delay = self.retry_base_delay;
                        in_flight.push(async move {
                            write_chunk_with_retry(write, chunk, max_retries, base_delay)
                                .await
                                .map(|_| chunk_len)
                        });
                    }
                    None => break,
                }
            }

            match in_flight.next().await {
                Some(Ok(chunk_len)) => {
                    written += chunk_len;
                    let _ = progress.send(ProgressEvent::new(step, written, total));
                }
                Some(Err(message)) => {
                    if fatal.is_none() {
                        fatal = Some(message);
                    }
                }
                None => break,
            }
        }

        if let Some(message) = fatal {
            Err(StepError::Fatal(message))
        } else if cancelled {
            Err(StepError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Roll back and translate a step failure into the public taxonomy.
    async fn abort(
        &self,
        batch: &mut ImportBatch,
        step: ImportStep,
        err: StepError,
    ) -> ImportError {
        let rollback = self.rollback(batch.company_id, batch.id).await;
        match err {
            StepError::Cancelled => {
                batch.status = ImportStatus::Cancelled;
                info!("import batch {} cancelled during {}; {}", batch.id, step.as_str(), rollback);
                ImportError::Cancelled { rollback }
            }
            StepError::Fatal(message) => {
                batch.status = ImportStatus::Error;
                error!(
                    "import batch {} failed during {}: {}; {}",
                    batch.id,
                    step.as_str(),
                    message,
                    rollback
                );
                ImportError::FatalWrite {
                    step,
                    message,
                    rollback,
                }
            }
        }
    }

    /// Delete everything this batch inserted, reverse entity order.
    /// The raw snapshot is intentionally left in place.
    async fn rollback(&self, company_id: Uuid, batch_id: Uuid) -> RollbackOutcome {
        let mut failed = false;
        for entity in EntityKind::ALL.iter().rev() {
            match self
                .store
                .delete_batch_rows(*entity, company_id, batch_id)
                .await
            {
                Ok(0) => {}
                Ok(removed) => {
                    info!(
                        "rolled back {} {} rows for batch {}",
                        removed,
                        entity.as_str(),
                        batch_id
                    );
                }
                Err(e) => {
                    error!(
                        "rollback of {} failed for batch {}: {}",
                        entity.as_str(),
                        batch_id,
                        e
                    );
                    failed = true;
                }
            }
        }
        if failed {
            RollbackOutcome::ManualCleanupRequired { batch_id }
        } else {
            RollbackOutcome::Clean
        }
    }
}

/// Retry transient chunk failures with exponential backoff; a fatal
/// error or an exhausted retry budget fails the chunk.
async fn write_chunk_with_retry<T, W>(
    write: W,
    chunk: Vec<T>,
    max_retries: u32,
    base_delay: Duration,
) -> Result<(), String>
where
    T: Clone,
    W: Fn(Vec<T>) -> BoxFuture<'static, Result<(), StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        match write(chunk.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() && attempt < max_retries => {
                attempt += 1;
                let delay = base_delay * 2u32.saturating_pow(attempt - 1);
                warn!(
                    "transient write failure (attempt {}/{}): {} — retrying in {:?}",
                    attempt, max_retries, err, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err.to_string()),
        }
    }
}
