//! Error types for Synheart Triage

use thiserror::Error;

use crate::types::ResourceType;

/// Errors returned by the triage engine.
///
/// None of these are process-fatal: ingestion failures drop the sample,
/// lifecycle violations are surfaced to the acting caller.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error("Invalid reading: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state for {entity} {id}: {reason}")]
    InvalidState {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("Conflict on resource {id}: {reason}")]
    Conflict { id: String, reason: String },

    #[error("No {0} available")]
    NoResourceAvailable(ResourceType),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl TriageError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        TriageError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid_state(
        entity: &'static str,
        id: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        TriageError::InvalidState {
            entity,
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn conflict(id: impl ToString, reason: impl Into<String>) -> Self {
        TriageError::Conflict {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Soft failures are operational warnings, not faults.
    pub fn is_warning(&self) -> bool {
        matches!(self, TriageError::NoResourceAvailable(_))
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            TriageError::Validation(_) => "VALIDATION_ERROR",
            TriageError::NotFound { .. } => "NOT_FOUND",
            TriageError::InvalidState { .. } => "INVALID_STATE",
            TriageError::Conflict { .. } => "CONFLICT",
            TriageError::NoResourceAvailable(_) => "NO_RESOURCE_AVAILABLE",
            TriageError::Config(_) => "CONFIG_ERROR",
            TriageError::JsonError(_) => "JSON_ERROR",
        }
    }
}
