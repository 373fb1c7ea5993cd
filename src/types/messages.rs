//! NATS message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    ColumnMapping, ImportStep, MappedField, MappingEdit, PerEntityCounts, PreviewStats, RawRow,
};

/// Generic request wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Tenant the request acts on; the gateway has already
    /// authenticated the caller against it.
    pub company_id: Uuid,
    pub payload: T,
}

impl<T> Request<T> {
    pub fn new(company_id: Uuid, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            company_id,
            payload,
        }
    }
}

/// Generic success response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(request_id: Uuid, payload: T) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(request_id: Uuid, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }
}

// =============================================================================
// ROUTE IMPORT — PREVIEW
// =============================================================================

/// Upload content: either raw CSV text (parsed worker-side) or rows
/// already parsed by the frontend. Exactly one must be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<RawRow>>,
}

/// Request for a mapping-review preview. Mapping edits are applied on
/// top of the auto-detected mapping before stats are computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteImportPreviewRequest {
    pub file_name: String,
    #[serde(flatten)]
    pub content: UploadContent,
    #[serde(default)]
    pub mapping_edits: Vec<MappingEdit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteImportPreviewResponse {
    pub mapping: ColumnMapping,
    pub missing_required_fields: Vec<MappedField>,
    pub stats: PreviewStats,
}

// =============================================================================
// ROUTE IMPORT — JOB QUEUE
// =============================================================================

/// Request to run a confirmed import as a background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteImportJobRequest {
    pub file_name: String,
    #[serde(flatten)]
    pub content: UploadContent,
    #[serde(default)]
    pub mapping_edits: Vec<MappingEdit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
}

/// Job envelope persisted in the JetStream work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRouteImportJob {
    pub id: Uuid,
    pub company_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub request: RouteImportJobRequest,
}

impl QueuedRouteImportJob {
    pub fn new(company_id: Uuid, request: RouteImportJobRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id,
            submitted_at: Utc::now(),
            request,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteImportJobSubmitResponse {
    pub job_id: Uuid,
    pub message: String,
}

/// Import job status published on `masar.job.import.route.status.{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RouteImportJobStatus {
    Queued {
        position: u32,
    },
    Processing {
        step: ImportStep,
        step_name: String,
        percent: u8,
        current_count: usize,
        total_count: usize,
    },
    Completed {
        counts: PerEntityCounts,
        duration_ms: u64,
    },
    Failed {
        error: String,
    },
    Cancelled {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteImportJobStatusUpdate {
    pub job_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub status: RouteImportJobStatus,
}

impl RouteImportJobStatusUpdate {
    pub fn new(job_id: Uuid, status: RouteImportJobStatus) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            status,
        }
    }
}

// =============================================================================
// CANCEL / HISTORY
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelImportRequest {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelImportResponse {
    pub cancelled: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryListRequest {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_update_flattens_state_tag() {
        let update = RouteImportJobStatusUpdate::new(
            Uuid::nil(),
            RouteImportJobStatus::Queued { position: 3 },
        );
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["state"], "queued");
        assert_eq!(json["position"], 3);
    }

    #[test]
    fn test_preview_request_accepts_csv_content() {
        let json = r#"{
            "fileName": "routes.csv",
            "csvContent": "a,b\n1,2",
            "mappingEdits": []
        }"#;
        let req: RouteImportPreviewRequest = serde_json::from_str(json).unwrap();
        assert!(req.content.csv_content.is_some());
        assert!(req.content.rows.is_none());
    }
}
