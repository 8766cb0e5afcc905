//! Structured error handling and exit codes.

use serde::Serialize;
use thiserror::Error;

use crate::audit::AuditError;
use crate::registry::RegistryError;
use crate::store::StoreError;

/// Errors surfaced by the engine's public operations.
///
/// The kind is preserved all the way to the caller, which maps it to a
/// user-facing response.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The parent record does not exist.
    #[error("{entity_type} {entity_id} not found")]
    EntityNotFound { entity_type: String, entity_id: i64 },

    /// Relationship definitions could not be loaded.
    #[error("relationship registry unavailable: {0}")]
    RegistryUnavailable(#[source] StoreError),

    /// An administrative registry operation was rejected.
    #[error(transparent)]
    Registry(RegistryError),

    /// The store failed, or an identifier was rejected by the allow-list.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Export was asked for a format other than csv or json.
    #[error("unsupported export format '{0}' (expected csv or json)")]
    UnsupportedFormat(String),

    /// A window, pagination or entity-type filter was malformed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A summary could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rendering an export failed.
    #[error("export rendering failed: {0}")]
    Render(String),
}

impl EngineError {
    /// Stable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EntityNotFound { .. } => "EntityNotFound",
            Self::RegistryUnavailable(_) => "RegistryUnavailable",
            Self::Registry(_) => "RegistryRejected",
            Self::Store(_) => "StoreError",
            Self::UnsupportedFormat(_) => "UnsupportedFormat",
            Self::InvalidFilter(_) => "InvalidFilter",
            Self::Serialization(_) => "SerializationError",
            Self::Render(_) => "RenderError",
        }
    }
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unavailable(source) => Self::RegistryUnavailable(source),
            other => Self::Registry(other),
        }
    }
}

impl From<AuditError> for EngineError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::Store(source) => Self::Store(source),
            AuditError::InvalidFilter(message) => Self::InvalidFilter(message),
        }
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Exit codes for the refguard binary.
///
/// - 0: Success (operation completed; `check` found the entity deletable)
/// - 1: General error (unexpected failure)
/// - 2: Blocked (`check` found dependencies that block deletion)
/// - 3: Partial success (refresh completed with per-entity failures)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: operation completed.
    Success = 0,
    /// General error: an unexpected error occurred.
    GeneralError = 1,
    /// Blocked: the entity has blocking dependents.
    Blocked = 2,
    /// Partial success: completed with some non-fatal failures.
    PartialSuccess = 3,
    /// Interrupted: stopped by Ctrl+C.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "RG000",
            Self::GeneralError => "RG001",
            Self::Blocked => "RG002",
            Self::PartialSuccess => "RG003",
            Self::Interrupted => "RG130",
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "RG001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Engine error kind, when the failure came from the engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    /// Human-readable error message
    pub message: String,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            kind: err.downcast_ref::<EngineError>().map(EngineError::kind),
            message: err.to_string(),
        }
    }
}
