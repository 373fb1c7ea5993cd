//! Route-master import handlers
//!
//! NATS request/reply surface for the import pipeline: preview
//! (mapping detection + stats for the review screen), submit, cancel
//! and history. The preview runs the same transform/extract code path
//! as the write, so the counts it shows are the counts a confirmed
//! import will produce.

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use sqlx::PgPool;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::db::queries;
use crate::services::cancellation::{CancelError, CANCELLATION};
use crate::services::import_processor::{resolve_rows, RouteImportProcessor, SubmitError};
use crate::services::{column_mapper, entity_extractor, row_transformer};
use crate::types::{
    CancelImportRequest, CancelImportResponse, ErrorResponse, HistoryListRequest, ImportError,
    Request, RouteImportJobRequest, RouteImportPreviewRequest, RouteImportPreviewResponse,
    SuccessResponse,
};

/// Handle `masar.import.route.preview` requests.
///
/// Pure computation: detect a mapping, apply operator edits, transform
/// and extract, and return stats plus the list of still-missing
/// required fields. No store mutation happens here.
pub async fn handle_preview(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received import.route.preview message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Preview message without reply subject");
                continue;
            }
        };

        let request: Request<RouteImportPreviewRequest> = match serde_json::from_slice(&msg.payload)
        {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse preview request: {}", e);
                let response = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
                continue;
            }
        };

        match build_preview(&request.payload) {
            Ok(preview) => {
                let response = SuccessResponse::new(request.id, preview);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                let response = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
        }
    }

    Ok(())
}

fn build_preview(
    request: &RouteImportPreviewRequest,
) -> Result<RouteImportPreviewResponse, ImportError> {
    let (headers, rows) = resolve_rows(&request.content)?;

    let mut mapping = column_mapper::detect(&headers);
    mapping.apply_edits(&request.mapping_edits);
    let validation = column_mapper::validate(&mapping);

    let records = row_transformer::transform(&rows, &mapping);
    let entities = entity_extractor::extract(&records);

    Ok(RouteImportPreviewResponse {
        mapping,
        missing_required_fields: validation.missing_required_fields,
        stats: entities.preview_stats(),
    })
}

/// Handle `masar.import.route.submit` requests.
///
/// The mapping is validated before anything is queued: an incomplete
/// mapping blocks confirmation with no store mutation.
pub async fn handle_submit(
    client: Client,
    mut subscriber: Subscriber,
    processor: Arc<RouteImportProcessor>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received import.route.submit message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Submit message without reply subject");
                continue;
            }
        };

        let request: Request<RouteImportJobRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse submit request: {}", e);
                let response = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
                continue;
            }
        };

        if let Err(e) = validate_submission(&request.payload) {
            let response = ErrorResponse::new(request.id, e.code(), e.to_string());
            let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            continue;
        }

        match processor.submit_job(request.company_id, request.payload).await {
            Ok(response) => {
                let response = SuccessResponse::new(request.id, response);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(SubmitError::ImportInProgress) => {
                let response = ErrorResponse::new(
                    request.id,
                    "IMPORT_IN_PROGRESS",
                    SubmitError::ImportInProgress.to_string(),
                );
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(SubmitError::Other(e)) => {
                error!("Failed to submit import job: {}", e);
                let response = ErrorResponse::new(request.id, "SUBMIT_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
        }
    }

    Ok(())
}

fn validate_submission(request: &RouteImportJobRequest) -> Result<(), ImportError> {
    let (headers, _rows) = resolve_rows(&request.content)?;
    let mut mapping = column_mapper::detect(&headers);
    mapping.apply_edits(&request.mapping_edits);
    let validation = column_mapper::validate(&mapping);
    if !validation.is_valid {
        return Err(ImportError::MappingIncomplete {
            missing: validation.missing_required_fields,
        });
    }
    Ok(())
}

/// Handle `masar.import.route.cancel` requests.
///
/// Cooperative: the running job observes the token between chunk
/// writes; a job still in the queue is pre-cancelled and skipped when
/// the processor picks it up.
pub async fn handle_cancel(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let request: Request<CancelImportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                let response = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
                continue;
            }
        };

        let job_id = request.payload.job_id;
        let payload = match CANCELLATION.cancel(&job_id, request.company_id) {
            Ok(true) => CancelImportResponse {
                cancelled: true,
                message: "Cancellation requested; written rows will be rolled back".to_string(),
            },
            Ok(false) => {
                // Not processing yet — pre-cancel so the processor
                // skips it if it is still queued.
                CANCELLATION.pre_cancel(job_id, request.company_id);
                CancelImportResponse {
                    cancelled: true,
                    message: "Job not processing; marked cancelled in queue".to_string(),
                }
            }
            Err(CancelError::NotOwner) => {
                let response =
                    ErrorResponse::new(request.id, "NOT_OWNER", "job belongs to another company");
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
                continue;
            }
        };

        let response = SuccessResponse::new(request.id, payload);
        let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
    }

    Ok(())
}

/// Handle `masar.import.history.list` requests.
pub async fn handle_history(client: Client, mut subscriber: Subscriber, pool: PgPool) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let request: Request<HistoryListRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                let response = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
                continue;
            }
        };

        let limit = request.payload.limit.clamp(1, 500);
        match queries::history::list_for_company(&pool, request.company_id, limit).await {
            Ok(entries) => {
                let response = SuccessResponse::new(request.id, entries);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to list import history: {}", e);
                let response = ErrorResponse::new(request.id, "HISTORY_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MappedField, MappingEdit, UploadContent};

    fn csv_request(csv: &str, edits: Vec<MappingEdit>) -> RouteImportPreviewRequest {
        RouteImportPreviewRequest {
            file_name: "routes.csv".into(),
            content: UploadContent {
                csv_content: Some(csv.to_string()),
                headers: None,
                rows: None,
            },
            mapping_edits: edits,
        }
    }

    const FULL_CSV: &str = "\
Branch,Route,Rep Code,Client Code,Customer Name,Latitude,Longitude,Week,Day
Riyadh Central,RT-01,U1,C-1,Al Noor Market,24.71,46.67,1,Sunday
Riyadh Central,RT-01,U2,C-2,Al Salam Grocery,0,0,1,Monday
Jeddah North,RT-09,U3,C-3,Red Sea Mart,21.54,39.17,2,Sunday
";

    #[test]
    fn test_preview_counts_and_missing_gps() {
        let preview = build_preview(&csv_request(FULL_CSV, vec![])).unwrap();

        assert!(preview.missing_required_fields.is_empty());
        assert_eq!(preview.stats.branches.count, 2);
        assert_eq!(preview.stats.customers.count, 3);
        assert_eq!(preview.stats.visits.count, 3);
        // RT-01 has reps {U1, U2}, RT-09 has {U3}
        assert_eq!(preview.stats.routes.count, 3);
        // The (0,0) row counts as missing GPS
        assert_eq!(preview.stats.missing_gps_count, 1);
    }

    #[test]
    fn test_preview_reports_missing_required_fields() {
        let preview =
            build_preview(&csv_request("Route,Client Code\nRT-01,C-1\n", vec![])).unwrap();
        assert!(preview
            .missing_required_fields
            .contains(&MappedField::CustomerNameEn));
        assert!(preview.missing_required_fields.contains(&MappedField::Lat));
    }

    #[test]
    fn test_preview_edits_change_downstream_records() {
        let csv = "Branch,Route,Client Code,Customer Name,Latitude,Longitude,Mystery\n\
                   B1,RT-01,C-1,Al Noor,24.7,46.6,REP-77\n";

        let without = build_preview(&csv_request(csv, vec![])).unwrap();
        assert_eq!(without.stats.routes.sample[0].rep_code, None);

        let with = build_preview(&csv_request(
            csv,
            vec![MappingEdit {
                field: MappedField::RepCode,
                source_column: Some("Mystery".into()),
            }],
        ))
        .unwrap();
        assert_eq!(with.stats.routes.sample[0].rep_code.as_deref(), Some("REP-77"));
    }

    #[test]
    fn test_submission_blocked_on_incomplete_mapping() {
        let request = RouteImportJobRequest {
            file_name: "routes.csv".into(),
            content: UploadContent {
                csv_content: Some("Route,Client Code\nRT-01,C-1\n".into()),
                headers: None,
                rows: None,
            },
            mapping_edits: vec![],
            uploader: None,
        };
        let err = validate_submission(&request).unwrap_err();
        assert_eq!(err.code(), "MAPPING_INCOMPLETE");
    }

    #[test]
    fn test_submission_passes_with_complete_mapping() {
        let request = RouteImportJobRequest {
            file_name: "routes.csv".into(),
            content: UploadContent {
                csv_content: Some(FULL_CSV.into()),
                headers: None,
                rows: None,
            },
            mapping_edits: vec![],
            uploader: Some("ops@masar.example".into()),
        };
        assert!(validate_submission(&request).is_ok());
    }
}
