//! Import batch lifecycle, progress and error types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Branch, Customer, MappedField, Route, Visit};

/// Lifecycle of one end-to-end import. Terminal states are `Complete`,
/// `Error` and `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Pending,
    Processing,
    Complete,
    Error,
    Cancelled,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Complete => "complete",
            ImportStatus::Error => "error",
            ImportStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportStatus::Complete | ImportStatus::Error | ImportStatus::Cancelled
        )
    }
}

/// Rows written per entity table for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerEntityCounts {
    pub branches: usize,
    pub routes: usize,
    pub customers: usize,
    pub visits: usize,
}

/// One end-to-end execution of the pipeline against one uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    pub id: Uuid,
    pub company_id: Uuid,
    pub file_name: String,
    pub raw_row_count: usize,
    pub started_at: DateTime<Utc>,
    pub status: ImportStatus,
    pub per_entity_counts: Option<PerEntityCounts>,
}

impl ImportBatch {
    pub fn new(company_id: Uuid, file_name: impl Into<String>, raw_row_count: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id,
            file_name: file_name.into(),
            raw_row_count,
            started_at: Utc::now(),
            status: ImportStatus::Pending,
            per_entity_counts: None,
        }
    }
}

/// The five sequential persistence steps. Ordering is fixed: routes
/// reference branch codes, visits reference route and customer keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStep {
    RawBackup,
    Branches,
    Routes,
    Customers,
    Visits,
}

impl ImportStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStep::RawBackup => "raw_backup",
            ImportStep::Branches => "branches",
            ImportStep::Routes => "routes",
            ImportStep::Customers => "customers",
            ImportStep::Visits => "visits",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ImportStep::RawBackup => "Backing up raw upload",
            ImportStep::Branches => "Syncing branches",
            ImportStep::Routes => "Syncing routes",
            ImportStep::Customers => "Syncing customers",
            ImportStep::Visits => "Syncing visit schedule",
        }
    }
}

/// Immutable progress snapshot, one per completed chunk write. Percent
/// is per-step (0-100); any global roll-up across steps is the
/// presentation layer's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub step: ImportStep,
    pub step_name: String,
    pub percent: u8,
    pub current_count: usize,
    pub total_count: usize,
}

impl ProgressEvent {
    pub fn new(step: ImportStep, current_count: usize, total_count: usize) -> Self {
        let percent = if total_count == 0 {
            100
        } else {
            ((current_count * 100) / total_count).min(100) as u8
        };
        Self {
            step,
            step_name: step.display_name().to_string(),
            percent,
            current_count,
            total_count,
        }
    }
}

/// Whether rollback of a failed batch actually reverted its rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "outcome")]
pub enum RollbackOutcome {
    /// All rows inserted under the batch id were deleted.
    Clean,
    /// Rollback itself failed; the operator must clean up by batch id.
    ManualCleanupRequired { batch_id: Uuid },
}

impl std::fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackOutcome::Clean => write!(f, "already-written rows were reverted"),
            RollbackOutcome::ManualCleanupRequired { batch_id } => {
                write!(f, "manual cleanup required for batch {}", batch_id)
            }
        }
    }
}

/// Import failure taxonomy. Transient write errors are retried inside
/// the orchestrator and only surface here once retries are exhausted.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("required fields have no source column: {}", format_fields(.missing))]
    MappingIncomplete { missing: Vec<MappedField> },

    #[error("malformed upload: {0}")]
    Parse(String),

    #[error("write failed during {}: {message}; {rollback}", .step.as_str())]
    FatalWrite {
        step: ImportStep,
        message: String,
        rollback: RollbackOutcome,
    },

    #[error("import cancelled; {rollback}")]
    Cancelled { rollback: RollbackOutcome },
}

impl ImportError {
    /// Machine-readable code for the NATS error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::MappingIncomplete { .. } => "MAPPING_INCOMPLETE",
            ImportError::Parse(_) => "PARSE_ERROR",
            ImportError::FatalWrite { .. } => "WRITE_ERROR",
            ImportError::Cancelled { .. } => "CANCELLED",
        }
    }
}

fn format_fields(fields: &[MappedField]) -> String {
    fields
        .iter()
        .map(|f| f.as_key())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Final outcome reported to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub per_entity_counts: PerEntityCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Count plus the first few entities, for the mapping-review screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPreview<T> {
    pub count: usize,
    pub sample: Vec<T>,
}

/// Preview statistics. Computed by the same extractor code path used at
/// write time so preview counts never diverge from write counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewStats {
    pub branches: EntityPreview<Branch>,
    pub routes: EntityPreview<Route>,
    pub customers: EntityPreview<Customer>,
    pub visits: EntityPreview<Visit>,
    pub missing_gps_count: usize,
}

/// Entry appended to the tenant history log on successful completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryLogEntry {
    pub id: Uuid,
    pub file_name: String,
    pub upload_date: DateTime<Utc>,
    pub record_count: usize,
    pub uploader: Option<String>,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub stats: PerEntityCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(ProgressEvent::new(ImportStep::Branches, 0, 10).percent, 0);
        assert_eq!(ProgressEvent::new(ImportStep::Branches, 5, 10).percent, 50);
        assert_eq!(ProgressEvent::new(ImportStep::Branches, 10, 10).percent, 100);
        // Empty step completes immediately
        assert_eq!(ProgressEvent::new(ImportStep::Visits, 0, 0).percent, 100);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ImportStatus::Complete.is_terminal());
        assert!(ImportStatus::Error.is_terminal());
        assert!(ImportStatus::Cancelled.is_terminal());
        assert!(!ImportStatus::Processing.is_terminal());
        assert!(!ImportStatus::Pending.is_terminal());
    }

    #[test]
    fn test_rollback_failure_message_names_batch() {
        let batch_id = Uuid::new_v4();
        let err = ImportError::FatalWrite {
            step: ImportStep::Customers,
            message: "constraint violation".into(),
            rollback: RollbackOutcome::ManualCleanupRequired { batch_id },
        };
        let text = err.to_string();
        assert!(text.contains("manual cleanup required for batch"));
        assert!(text.contains(&batch_id.to_string()));
    }

    #[test]
    fn test_mapping_incomplete_lists_fields() {
        let err = ImportError::MappingIncomplete {
            missing: vec![MappedField::RouteName, MappedField::Lat],
        };
        assert_eq!(err.code(), "MAPPING_INCOMPLETE");
        assert!(err.to_string().contains("route_name, lat"));
    }
}
