//! Entities, relationships, evidence anchors, and the type-code registry.

use crate::error::{Result, TraceError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// Free-form attribute bag. Ordered so canonical serialization (and therefore
/// content hashing) is deterministic.
pub type Attributes = BTreeMap<String, serde_json::Value>;

// ============================================================================
// Evidence Anchor
// ============================================================================

/// Provenance pointer justifying why a record was extracted: the source file,
/// the 1-based line range, and the version of the extractor that produced it.
///
/// Immutable value object; embedded in records and ledger entries, never
/// persisted as its own row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceAnchor {
    pub source_file: String,
    pub line_start: u32,
    pub line_end: u32,
    pub extractor_version: String,
}

impl EvidenceAnchor {
    pub fn new(
        source_file: impl Into<String>,
        line_start: u32,
        line_end: u32,
        extractor_version: impl Into<String>,
    ) -> Result<Self> {
        let source_file = source_file.into();
        if line_start < 1 || line_end < line_start {
            return Err(TraceError::InvalidEvidence {
                source_file,
                line_start,
                line_end,
            });
        }
        Ok(Self {
            source_file,
            line_start,
            line_end,
            extractor_version: extractor_version.into(),
        })
    }
}

// ============================================================================
// Type Codes
// ============================================================================

/// Validated entity type code. Constructed only through [`TypeRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityTypeCode(String);

/// Validated relationship type code. Constructed only through [`TypeRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipTypeCode(String);

impl EntityTypeCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RelationshipTypeCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityTypeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for RelationshipTypeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed registry of the type codes a deployment accepts.
///
/// Codes stay opaque strings inside the engine; the registry exists so that
/// an unknown code is rejected at the boundary instead of flowing into the
/// stores ("unknown = fail" governance posture).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeRegistry {
    entity_types: BTreeSet<String>,
    relationship_types: BTreeSet<String>,
}

impl TypeRegistry {
    pub fn new(
        entity_types: impl IntoIterator<Item = String>,
        relationship_types: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            entity_types: entity_types.into_iter().collect(),
            relationship_types: relationship_types.into_iter().collect(),
        }
    }

    /// The codebase-traceability vocabulary used by the built-in pipeline.
    pub fn codebase_traceability() -> Self {
        let entities = [
            "REQUIREMENT",
            "DOCUMENT",
            "DIRECTORY",
            "SOURCE_FILE",
            "FUNCTION",
            "TEST",
            "COMMIT",
        ];
        let relationships = [
            "CONTAINS",
            "DEFINES",
            "IMPLEMENTS",
            "TESTS",
            "CALLS",
            "MODIFIES",
            "REFERENCES",
        ];
        Self::new(
            entities.iter().map(|s| s.to_string()),
            relationships.iter().map(|s| s.to_string()),
        )
    }

    pub fn entity_type(&self, code: &str) -> Result<EntityTypeCode> {
        if self.entity_types.contains(code) {
            Ok(EntityTypeCode(code.to_string()))
        } else {
            Err(TraceError::UnknownTypeCode {
                kind: "entity",
                code: code.to_string(),
            })
        }
    }

    pub fn relationship_type(&self, code: &str) -> Result<RelationshipTypeCode> {
        if self.relationship_types.contains(code) {
            Ok(RelationshipTypeCode(code.to_string()))
        } else {
            Err(TraceError::UnknownTypeCode {
                kind: "relationship",
                code: code.to_string(),
            })
        }
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entity_types.iter().map(|s| s.as_str())
    }

    pub fn relationship_types(&self) -> impl Iterator<Item = &str> {
        self.relationship_types.iter().map(|s| s.as_str())
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::codebase_traceability()
    }
}

// ============================================================================
// Extraction Boundary (raw records from providers)
// ============================================================================

/// Candidate entity as emitted by an extraction provider. Raw strings; not
/// yet validated against the registry or evidence rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub entity_type: String,
    pub instance_id: String,
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub source_file: String,
    pub line_start: u32,
    pub line_end: u32,
}

/// Candidate relationship as emitted by an extraction provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub relationship_type: String,
    pub instance_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub from_instance_id: String,
    pub to_instance_id: String,
    /// Defaults to 1.0 when the provider does not score its output.
    #[serde(default)]
    pub confidence: Option<f64>,
    pub source_file: String,
    pub line_start: u32,
    pub line_end: u32,
}

// ============================================================================
// Validated Candidates
// ============================================================================

fn entity_instance_id_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[^\s:]\S*$").expect("static regex"))
}

/// Entity instance-id shape check. Candidate fields are plain data, so the
/// store-side write path re-asserts this in addition to the boundary
/// constructor.
pub fn validate_entity_instance_id(instance_id: &str) -> Result<()> {
    if !entity_instance_id_re().is_match(instance_id) {
        return Err(TraceError::InvalidInstanceId {
            instance_id: instance_id.to_string(),
            reason: "entity instance ids must be non-empty, without whitespace, and must not start with ':'".to_string(),
        });
    }
    Ok(())
}

/// Entity candidate validated at the boundary: known type code, well-formed
/// instance id, legal evidence anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub entity_type: EntityTypeCode,
    pub instance_id: String,
    pub name: String,
    pub attributes: Attributes,
    pub evidence: EvidenceAnchor,
}

impl EntityCandidate {
    pub fn from_extracted(
        registry: &TypeRegistry,
        raw: ExtractedEntity,
        extractor_version: &str,
    ) -> Result<Self> {
        let entity_type = registry.entity_type(&raw.entity_type)?;
        validate_entity_instance_id(&raw.instance_id)?;
        let evidence =
            EvidenceAnchor::new(raw.source_file, raw.line_start, raw.line_end, extractor_version)?;
        Ok(Self {
            entity_type,
            instance_id: raw.instance_id,
            name: raw.name,
            attributes: raw.attributes,
            evidence,
        })
    }
}

/// Relationship candidate validated at the boundary. Endpoint *resolution*
/// (instance id -> internal entity id) happens later, inside the upsert
/// service, because it needs the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipCandidate {
    pub relationship_type: RelationshipTypeCode,
    pub instance_id: String,
    pub name: Option<String>,
    pub from_instance_id: String,
    pub to_instance_id: String,
    pub confidence: f64,
    pub evidence: EvidenceAnchor,
}

impl RelationshipCandidate {
    pub fn from_extracted(
        registry: &TypeRegistry,
        raw: ExtractedRelationship,
        extractor_version: &str,
    ) -> Result<Self> {
        let relationship_type = registry.relationship_type(&raw.relationship_type)?;
        // The composite key must be reconstructible from its parts; anything
        // else breaks idempotency across runs.
        let expected = format!(
            "{}:{}:{}",
            relationship_type.as_str(),
            raw.from_instance_id,
            raw.to_instance_id
        );
        if raw.instance_id != expected {
            return Err(TraceError::InvalidInstanceId {
                instance_id: raw.instance_id,
                reason: format!("expected {{TYPE}}:{{from}}:{{to}} = {expected:?}"),
            });
        }
        let evidence =
            EvidenceAnchor::new(raw.source_file, raw.line_start, raw.line_end, extractor_version)?;
        Ok(Self {
            relationship_type,
            instance_id: raw.instance_id,
            name: raw.name,
            from_instance_id: raw.from_instance_id,
            to_instance_id: raw.to_instance_id,
            confidence: raw.confidence.unwrap_or(1.0),
            evidence,
        })
    }
}

// ============================================================================
// Stored Records
// ============================================================================

/// Entity row in the primary store. `content_hash` covers semantic fields
/// only (type, instance id, name, attributes), *not* the evidence anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Internal surrogate id, unique within the primary store.
    pub id: u64,
    pub project_id: String,
    pub entity_type: EntityTypeCode,
    pub instance_id: String,
    pub name: String,
    pub attributes: Attributes,
    pub evidence: EvidenceAnchor,
    pub content_hash: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Relationship row in the primary store. `content_hash` *includes* the
/// evidence line range, unlike entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub id: u64,
    pub project_id: String,
    pub relationship_type: RelationshipTypeCode,
    pub instance_id: String,
    pub name: Option<String>,
    pub from_entity_id: u64,
    pub to_entity_id: u64,
    pub from_instance_id: String,
    pub to_instance_id: String,
    pub confidence: f64,
    pub evidence: EvidenceAnchor,
    pub content_hash: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Classification of a single upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    /// Row inserted.
    Created,
    /// Row existed and the stored hash differed.
    Updated,
    /// Row existed with an identical hash; no write occurred.
    Noop,
}
