//! Shadow-ledger entries and epoch records.
//!
//! Ledger entries are immutable once written; the ledger file is append-only.
//! Epoch records are terminal snapshots of one extraction run: their final
//! counts are always *derived* by re-scanning the ledger, never accumulated
//! while the run is in flight.

use crate::types::EvidenceAnchor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State-changing operation recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LedgerOp {
    Create,
    Update,
    /// Lifecycle/audit event (pipeline started, pipeline completed, ...).
    Decision,
}

/// What kind of record the entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Entity,
    Relationship,
    Pipeline,
    /// Advisory observations (retries, downgraded failures) captured for
    /// audit alongside the authoritative CREATE/UPDATE trail.
    Signal,
}

/// One immutable, self-describing ledger line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: LedgerOp,
    pub kind: LedgerKind,
    /// Entity or relationship type code; `None` for lifecycle entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_code: Option<String>,
    /// Internal store id of the affected row, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<EvidenceAnchor>,
    /// Free-text detail for DECISION/Signal entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_id: Option<Uuid>,
    pub repo_sha: String,
    pub runner_sha: String,
    pub brd_hash: String,
}

/// Epoch lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochStatus {
    Running,
    Completed,
    Failed,
}

/// Final counts for a completed epoch, derived from the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochCounts {
    pub entities_created: u64,
    pub entities_updated: u64,
    pub relationships_created: u64,
    pub relationships_updated: u64,
    pub decisions_logged: u64,
    pub signals_captured: u64,
}

/// One bracketed extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epoch {
    pub epoch_id: Uuid,
    pub project_id: String,
    /// Revision of the source repository being extracted.
    pub repo_sha: String,
    /// Revision of the extraction engine itself.
    pub runner_sha: String,
    /// Canonicalized hash of the governing requirements document, used to
    /// detect spec drift between runs.
    pub brd_hash: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: EpochStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<EpochCounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl LedgerEntry {
    /// Lifecycle DECISION entry (no record attached).
    pub fn decision(
        project_id: &str,
        epoch_id: Option<Uuid>,
        detail: &str,
        repo_sha: &str,
        runner_sha: &str,
        brd_hash: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: LedgerOp::Decision,
            kind: LedgerKind::Pipeline,
            type_code: None,
            entity_id: None,
            instance_id: None,
            content_hash: None,
            evidence: None,
            detail: Some(detail.to_string()),
            project_id: project_id.to_string(),
            epoch_id,
            repo_sha: repo_sha.to_string(),
            runner_sha: runner_sha.to_string(),
            brd_hash: brd_hash.to_string(),
        }
    }
}
