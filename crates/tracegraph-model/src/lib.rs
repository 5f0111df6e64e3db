//! TraceGraph Core Model
//!
//! Value types shared by every layer of the traceability engine:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      CORE MODEL                                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  Extraction boundary      Validated candidates      Records     │
//! │  ┌──────────────────┐     ┌────────────────────┐  ┌──────────┐  │
//! │  │ ExtractedEntity  │────►│ EntityCandidate    │─►│ Entity   │  │
//! │  │ ExtractedRelation│────►│ RelationshipCand.  │─►│ Relation │  │
//! │  └──────────────────┘     └────────────────────┘  └──────────┘  │
//! │        (raw strings)        (typed, evidence-       (hashed,    │
//! │                              anchored)               stored)    │
//! │                                                                 │
//! │  Plus: shadow-ledger entries, epoch records, error taxonomy.    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key invariants owned here
//!
//! - **Evidence anchors** are validated on construction (`line_start >= 1`,
//!   `line_end >= line_start`) and immutable afterwards.
//! - **Type codes** are validated against a closed [`TypeRegistry`] at the
//!   boundary; an unknown code is a hard error, never silently accepted.
//! - **Content hashes** are deterministic digests of semantic fields. Entity
//!   hashes exclude the evidence anchor; relationship hashes include it.
//!   That asymmetry is deliberate: an evidence correction on a relationship
//!   must surface as a real UPDATE, while a moved-but-unchanged entity must
//!   stay a NO-OP.

pub mod error;
pub mod hash;
pub mod ledger;
pub mod types;

pub use error::{ErrorKind, Result, TraceError};
pub use hash::{canonical_document_hash, entity_content_hash, relationship_content_hash};
pub use ledger::{Epoch, EpochCounts, EpochStatus, LedgerEntry, LedgerKind, LedgerOp};
pub use types::{
    validate_entity_instance_id, Attributes, EntityCandidate, EntityRecord, EntityTypeCode,
    EvidenceAnchor, ExtractedEntity, ExtractedRelationship, RelationshipCandidate,
    RelationshipRecord, RelationshipTypeCode, TypeRegistry, UpsertOutcome,
};

/// Tenant scope for every record, ledger entry, and epoch.
pub type ProjectId = String;
