//! Route-master import JetStream processor
//!
//! Wraps the import pipeline with JetStream for:
//! - Automatic backpressure
//! - Real-time per-step progress updates
//! - Persistence across restarts
//!
//! ## Streams
//! - `MASAR_ROUTE_IMPORT_JOBS` - confirmed route-master imports

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_nats::jetstream::{self, Context as JsContext};
use async_nats::Client;
use futures::StreamExt;
use parking_lot::Mutex;
use sqlx::PgPool;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::queries;
use crate::services::cancellation::CANCELLATION;
use crate::services::csv_ingest::parse_csv;
use crate::services::entity_extractor::{ExtractedEntities, Extractor};
use crate::services::orchestrator::Orchestrator;
use crate::services::store::PgEntityStore;
use crate::services::{column_mapper, row_transformer};
use crate::types::{
    HistoryLogEntry, ImportBatch, ImportError, IntermediateRecord, QueuedRouteImportJob, RawRow,
    RouteImportJobRequest, RouteImportJobStatus, RouteImportJobStatusUpdate,
    RouteImportJobSubmitResponse, UploadContent,
};

// Stream and consumer names
const STREAM_NAME: &str = "MASAR_ROUTE_IMPORT_JOBS";
const CONSUMER_NAME: &str = "route_import_workers";
const SUBJECT: &str = "masar.jobs.import.route";
const STATUS_PREFIX: &str = "masar.job.import.route.status";

/// Rows of pure CPU work (transform/extract) between yield points, so
/// cancellation and progress stay responsive on very large files.
const YIELD_EVERY_ROWS: usize = 1_000;

/// Submission failures the caller distinguishes from plain errors.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Exactly one import batch may be in flight per tenant.
    #[error("an import is already queued or processing for this company")]
    ImportInProgress,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Route import job processor with JetStream integration
pub struct RouteImportProcessor {
    client: Client,
    js: JsContext,
    pool: PgPool,
    orchestrator: Orchestrator,
    pending_count: AtomicU32,
    /// Jobs accepted but not yet picked up, per company. Part of the
    /// one-import-per-tenant guard alongside the cancellation registry
    /// and the batch table.
    queued_per_company: Mutex<HashMap<Uuid, u32>>,
}

impl RouteImportProcessor {
    /// Create a new processor, initializing the JetStream stream.
    pub async fn new(client: Client, pool: PgPool, config: &Config) -> Result<Self> {
        let js = jetstream::new(client.clone());

        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![SUBJECT.to_string()],
            max_messages: 1_000,
            max_bytes: 500 * 1024 * 1024,
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config).await?;
        info!("JetStream route import stream '{}' ready", STREAM_NAME);

        let store = Arc::new(PgEntityStore::new(pool.clone()));
        let orchestrator = Orchestrator::new(store).with_tuning(
            config.import_chunk_size,
            config.import_write_concurrency,
            config.import_max_write_retries,
        );

        Ok(Self {
            client,
            js,
            pool,
            orchestrator,
            pending_count: AtomicU32::new(0),
            queued_per_company: Mutex::new(HashMap::new()),
        })
    }

    /// Submit a confirmed import job to the queue.
    pub async fn submit_job(
        &self,
        company_id: Uuid,
        request: RouteImportJobRequest,
    ) -> Result<RouteImportJobSubmitResponse, SubmitError> {
        if self.is_company_busy(company_id).await? {
            return Err(SubmitError::ImportInProgress);
        }

        let job = QueuedRouteImportJob::new(company_id, request);
        let job_id = job.id;

        let payload = serde_json::to_vec(&job).map_err(anyhow::Error::from)?;
        self.js
            .publish(SUBJECT, payload.into())
            .await
            .map_err(anyhow::Error::from)?
            .await
            .map_err(anyhow::Error::from)?;

        *self.queued_per_company.lock().entry(company_id).or_insert(0) += 1;
        let pending = self.pending_count.fetch_add(1, Ordering::Relaxed) + 1;

        info!("route import job {} submitted, position {} in queue", job_id, pending);

        self.publish_status(job_id, RouteImportJobStatus::Queued { position: pending })
            .await
            .map_err(SubmitError::Other)?;

        Ok(RouteImportJobSubmitResponse {
            job_id,
            message: "Import job queued".to_string(),
        })
    }

    /// One import per tenant: reject while a job is queued, registered
    /// as processing, or a batch row is still non-terminal.
    async fn is_company_busy(&self, company_id: Uuid) -> Result<bool> {
        if *self.queued_per_company.lock().get(&company_id).unwrap_or(&0) > 0 {
            return Ok(true);
        }
        if CANCELLATION.has_active_for_company(company_id) {
            return Ok(true);
        }
        Ok(queries::import_batch::has_active(&self.pool, company_id).await?)
    }

    /// Publish a job status update on the per-job subject.
    pub async fn publish_status(&self, job_id: Uuid, status: RouteImportJobStatus) -> Result<()> {
        publish_status_with(&self.client, job_id, status).await
    }

    /// Start processing jobs from the queue.
    pub async fn start_processing(self: Arc<Self>) -> Result<()> {
        let stream = self.js.get_stream(STREAM_NAME).await?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(CONSUMER_NAME.to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            max_deliver: 3,
            ..Default::default()
        };

        let consumer = stream.get_or_create_consumer(CONSUMER_NAME, consumer_config).await?;
        info!("JetStream route import consumer '{}' ready", CONSUMER_NAME);

        let mut messages = consumer.messages().await?;

        while let Some(msg) = messages.next().await {
            match msg {
                Ok(msg) => {
                    // Sequential on purpose: one orchestrating task per
                    // import keeps entity ordering and the tenant guard
                    // trivially correct.
                    if let Err(e) = self.process_job(msg).await {
                        error!("Failed to process route import job: {}", e);
                    }
                }
                Err(e) => {
                    error!("Error receiving route import message: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Process a single import job end to end.
    async fn process_job(&self, msg: jetstream::Message) -> Result<()> {
        let started = Instant::now();
        let job: QueuedRouteImportJob = serde_json::from_slice(&msg.payload)?;
        let job_id = job.id;
        let company_id = job.company_id;

        self.pending_count.fetch_sub(1, Ordering::Relaxed);
        if let Some(queued) = self.queued_per_company.lock().get_mut(&company_id) {
            *queued = queued.saturating_sub(1);
        }

        // ACK immediately to prevent redelivery during long processing
        if let Err(e) = msg.ack().await {
            error!("Failed to ack route import job {}: {:?}", job_id, e);
        }

        // Cancelled while still in the queue
        if CANCELLATION.is_cancelled(&job_id) {
            info!("route import job {} was cancelled before processing", job_id);
            CANCELLATION.remove(&job_id);
            self.publish_status(
                job_id,
                RouteImportJobStatus::Cancelled {
                    message: "Import cancelled before processing started".to_string(),
                },
            )
            .await?;
            return Ok(());
        }

        let _guard = CANCELLATION.register(job_id, company_id);
        let cancel = CANCELLATION.token(&job_id).unwrap_or_default();

        info!(
            "Processing route import job {} from file '{}'",
            job_id, job.request.file_name
        );

        match self.run_job(&job, &cancel).await {
            Ok(JobOutcome::Completed { batch, entities }) => {
                let counts = batch.per_entity_counts.unwrap_or_default();
                let duration_ms = started.elapsed().as_millis() as u64;

                let entry = HistoryLogEntry {
                    id: Uuid::new_v4(),
                    file_name: batch.file_name.clone(),
                    upload_date: chrono::Utc::now(),
                    record_count: batch.raw_row_count,
                    uploader: job.request.uploader.clone(),
                    entry_type: "ROUTE".to_string(),
                    stats: counts,
                };
                if let Err(e) = queries::history::append(&self.pool, company_id, &entry).await {
                    warn!("failed to append history for batch {}: {}", batch.id, e);
                }

                self.publish_status(
                    job_id,
                    RouteImportJobStatus::Completed { counts, duration_ms },
                )
                .await?;
                info!(
                    "route import job {} completed in {}ms: {} branches, {} routes, {} customers, {} visits ({} active routes)",
                    job_id,
                    duration_ms,
                    counts.branches,
                    counts.routes,
                    counts.customers,
                    counts.visits,
                    entities.stats.active_route_count
                );
            }
            Ok(JobOutcome::Cancelled { message }) => {
                self.publish_status(job_id, RouteImportJobStatus::Cancelled { message })
                    .await?;
                info!("route import job {} cancelled", job_id);
            }
            Err(e) => {
                warn!("route import job {} failed: {}", job_id, e);
                self.publish_status(
                    job_id,
                    RouteImportJobStatus::Failed { error: e.to_string() },
                )
                .await?;
            }
        }

        Ok(())
    }

    /// The pipeline proper: parse → map → validate → transform →
    /// extract → persist.
    async fn run_job(
        &self,
        job: &QueuedRouteImportJob,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, ImportError> {
        let job_id = job.id;
        let company_id = job.company_id;

        let (headers, raw_rows) = resolve_rows(&job.request.content)?;

        let mut mapping = column_mapper::detect(&headers);
        mapping.apply_edits(&job.request.mapping_edits);
        let validation = column_mapper::validate(&mapping);
        if !validation.is_valid {
            return Err(ImportError::MappingIncomplete {
                missing: validation.missing_required_fields,
            });
        }

        // Pure CPU stages, chunked so cancellation stays responsive
        let mut records: Vec<IntermediateRecord> = Vec::with_capacity(raw_rows.len());
        for chunk in raw_rows.chunks(YIELD_EVERY_ROWS) {
            if cancel.is_cancelled() {
                return Ok(JobOutcome::cancelled_before_write());
            }
            records.extend(row_transformer::transform(chunk, &mapping));
            tokio::task::yield_now().await;
        }

        let mut extractor = Extractor::new();
        for chunk in records.chunks(YIELD_EVERY_ROWS) {
            if cancel.is_cancelled() {
                return Ok(JobOutcome::cancelled_before_write());
            }
            for record in chunk {
                extractor.push(record);
            }
            tokio::task::yield_now().await;
        }
        let entities = extractor.finish();

        let mut batch = ImportBatch::new(company_id, job.request.file_name.clone(), raw_rows.len());
        queries::import_batch::create(&self.pool, &batch)
            .await
            .map_err(|e| ImportError::FatalWrite {
                step: crate::types::ImportStep::RawBackup,
                message: format!("could not create import batch: {}", e),
                rollback: crate::types::RollbackOutcome::Clean,
            })?;

        // Forward orchestrator progress to the per-job status subject
        let (progress_tx, mut progress_rx) =
            tokio::sync::mpsc::unbounded_channel::<crate::types::ProgressEvent>();
        let forwarder = {
            let client = self.client.clone();
            tokio::spawn(async move {
                while let Some(event) = progress_rx.recv().await {
                    let status = RouteImportJobStatus::Processing {
                        step: event.step,
                        step_name: event.step_name,
                        percent: event.percent,
                        current_count: event.current_count,
                        total_count: event.total_count,
                    };
                    if let Err(e) = publish_status_with(&client, job_id, status).await {
                        warn!("failed to publish progress for job {}: {}", job_id, e);
                    }
                }
            })
        };

        let result = self
            .orchestrator
            .run(&mut batch, &raw_rows, &entities, &progress_tx, cancel)
            .await;
        drop(progress_tx);
        let _ = forwarder.await;

        if let Err(e) = queries::import_batch::update_status(
            &self.pool,
            batch.id,
            batch.status,
            batch.per_entity_counts,
        )
        .await
        {
            warn!("failed to persist status for batch {}: {}", batch.id, e);
        }

        match result {
            Ok(_counts) => Ok(JobOutcome::Completed { batch, entities }),
            Err(err @ ImportError::Cancelled { .. }) => Ok(JobOutcome::Cancelled {
                message: err.to_string(),
            }),
            Err(err) => Err(err),
        }
    }
}

enum JobOutcome {
    Completed {
        batch: ImportBatch,
        entities: ExtractedEntities,
    },
    Cancelled {
        message: String,
    },
}

impl JobOutcome {
    fn cancelled_before_write() -> Self {
        JobOutcome::Cancelled {
            message: "Import cancelled; no data was written".to_string(),
        }
    }
}

async fn publish_status_with(
    client: &Client,
    job_id: Uuid,
    status: RouteImportJobStatus,
) -> Result<()> {
    let update = RouteImportJobStatusUpdate::new(job_id, status);
    let subject = format!("{}.{}", STATUS_PREFIX, job_id);
    let payload = serde_json::to_vec(&update)?;
    client.publish(subject, payload.into()).await?;
    Ok(())
}

/// Resolve the upload content into headers plus raw rows, parsing CSV
/// text worker-side when the frontend shipped it unparsed.
pub fn resolve_rows(content: &UploadContent) -> Result<(Vec<String>, Vec<RawRow>), ImportError> {
    if let Some(csv_content) = &content.csv_content {
        return parse_csv(csv_content);
    }
    match (&content.headers, &content.rows) {
        (Some(headers), Some(rows)) => Ok((headers.clone(), rows.clone())),
        _ => Err(ImportError::Parse(
            "upload must carry csvContent or headers plus rows".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CellValue, MappedField, MappingEdit};

    #[test]
    fn test_stream_names() {
        assert_eq!(STREAM_NAME, "MASAR_ROUTE_IMPORT_JOBS");
        assert!(SUBJECT.starts_with("masar.jobs.import"));
    }

    #[test]
    fn test_status_prefix() {
        assert!(STATUS_PREFIX.starts_with("masar.job.import.route.status"));
    }

    #[test]
    fn test_resolve_rows_prefers_csv_content() {
        let content = UploadContent {
            csv_content: Some("A,B\n1,2\n".into()),
            headers: None,
            rows: None,
        };
        let (headers, rows) = resolve_rows(&content).unwrap();
        assert_eq!(headers, vec!["A", "B"]);
        assert_eq!(rows[0].get("A"), Some(&CellValue::Number(1.0)));
    }

    #[test]
    fn test_resolve_rows_requires_some_content() {
        let content = UploadContent {
            csv_content: None,
            headers: Some(vec!["A".into()]),
            rows: None,
        };
        assert!(matches!(
            resolve_rows(&content),
            Err(ImportError::Parse(_))
        ));
    }

    #[test]
    fn test_mapping_edits_apply_on_top_of_detection() {
        let headers: Vec<String> = vec!["Route".into(), "Mystery Column".into()];
        let mut mapping = column_mapper::detect(&headers);
        assert_eq!(mapping.get(MappedField::ClientCode), None);

        mapping.apply_edits(&[MappingEdit {
            field: MappedField::ClientCode,
            source_column: Some("Mystery Column".into()),
        }]);
        assert_eq!(mapping.get(MappedField::ClientCode), Some("Mystery Column"));
    }
}
