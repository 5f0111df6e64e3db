//! Error taxonomy for the traceability engine.
//!
//! Every fatal condition names the offending record and the reason; callers
//! dispatch on [`ErrorKind`] (structured classification) rather than matching
//! on error text.

use thiserror::Error;

/// Coarse classification used by the pipeline orchestrator to decide between
/// retry, downgrade-to-warning, and hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input caught before any store access.
    Validation,
    /// An edge endpoint that does not exist in the project.
    Referential,
    /// A connectivity-style failure worth exactly one retry.
    Transient,
    /// Malformed persisted state (ledger/corpus lines).
    Corruption,
    /// Lifecycle misuse (epoch already running, duplicate CREATE, ...).
    State,
    /// Everything else that touched the disk.
    Io,
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("invalid instance id {instance_id:?}: {reason}")]
    InvalidInstanceId { instance_id: String, reason: String },

    #[error("unknown {kind} type code {code:?}")]
    UnknownTypeCode { kind: &'static str, code: String },

    #[error("invalid evidence anchor for {source_file}: line_start={line_start}, line_end={line_end}")]
    InvalidEvidence {
        source_file: String,
        line_start: u32,
        line_end: u32,
    },

    #[error("relationship {relationship_type} {instance_id:?}: {endpoint} endpoint {missing_instance_id:?} not found in project {project_id:?}")]
    MissingEndpoint {
        relationship_type: String,
        instance_id: String,
        /// Which side was unresolved ("from" or "to").
        endpoint: &'static str,
        missing_instance_id: String,
        project_id: String,
    },

    #[error("duplicate CREATE within epoch {epoch_id}: {kind} {type_code} {instance_id:?}")]
    DuplicateCreate {
        epoch_id: uuid::Uuid,
        kind: String,
        type_code: String,
        instance_id: String,
    },

    #[error("epoch {running_epoch_id} is already running for project {project_id:?}")]
    EpochAlreadyRunning {
        project_id: String,
        running_epoch_id: uuid::Uuid,
    },

    #[error("no epoch is running for project {project_id:?}")]
    NoActiveEpoch { project_id: String },

    #[error("epoch {epoch_id} not found")]
    EpochNotFound { epoch_id: uuid::Uuid },

    #[error("corrupt ledger line {line_number} in {path}: {reason}")]
    LedgerCorrupt {
        path: String,
        line_number: usize,
        reason: String,
    },

    #[error("transient store failure: {message}")]
    Transient { message: String },

    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TraceError {
    /// Structured severity/retry classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TraceError::InvalidInstanceId { .. }
            | TraceError::UnknownTypeCode { .. }
            | TraceError::InvalidEvidence { .. } => ErrorKind::Validation,
            TraceError::MissingEndpoint { .. } => ErrorKind::Referential,
            TraceError::Transient { .. } => ErrorKind::Transient,
            TraceError::LedgerCorrupt { .. } => ErrorKind::Corruption,
            TraceError::DuplicateCreate { .. }
            | TraceError::EpochAlreadyRunning { .. }
            | TraceError::NoActiveEpoch { .. }
            | TraceError::EpochNotFound { .. } => ErrorKind::State,
            TraceError::Serde(_) | TraceError::Io(_) => ErrorKind::Io,
        }
    }

    /// Convenience constructor for connectivity-style failures.
    pub fn transient(message: impl Into<String>) -> Self {
        TraceError::Transient {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;
