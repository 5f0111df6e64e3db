//! Content hashing: deterministic `sha256:<hex>` digests over semantic
//! fields.
//!
//! The stream fed to the hasher is field-tagged and length-prefixed so that
//! adjacent fields can never be confused for one another, and attributes are
//! folded in canonical (BTreeMap) order.
//!
//! Asymmetry, on purpose: entity hashes exclude the evidence anchor so a
//! reformatted file does not churn every entity row; relationship hashes
//! include `source_file`/`line_start`/`line_end` so an evidence correction
//! forces a real UPDATE instead of vanishing as a NO-OP.

use crate::types::{Attributes, EntityCandidate, RelationshipCandidate};
use sha2::{Digest, Sha256};

struct FieldHasher {
    inner: Sha256,
}

impl FieldHasher {
    fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    fn field(&mut self, tag: &str, value: &str) {
        self.inner.update(tag.as_bytes());
        self.inner.update((value.len() as u64).to_le_bytes());
        self.inner.update(value.as_bytes());
    }

    fn finish(self) -> String {
        let digest = self.inner.finalize();
        let mut out = String::with_capacity(7 + digest.len() * 2);
        out.push_str("sha256:");
        for b in digest.iter() {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }
}

fn canonical_attributes(attributes: &Attributes) -> String {
    // BTreeMap iteration order is the canonical order; serde_json preserves it.
    serde_json::to_string(attributes).unwrap_or_else(|_| "{}".to_string())
}

/// Digest of an entity's semantic fields. Evidence is excluded.
pub fn entity_content_hash(candidate: &EntityCandidate) -> String {
    let mut h = FieldHasher::new();
    h.field("entity_type", candidate.entity_type.as_str());
    h.field("instance_id", &candidate.instance_id);
    h.field("name", &candidate.name);
    h.field("attributes", &canonical_attributes(&candidate.attributes));
    h.finish()
}

/// Digest of a relationship's semantic fields *plus* its evidence line range.
pub fn relationship_content_hash(candidate: &RelationshipCandidate) -> String {
    let mut h = FieldHasher::new();
    h.field("relationship_type", candidate.relationship_type.as_str());
    h.field("instance_id", &candidate.instance_id);
    h.field("from_instance_id", &candidate.from_instance_id);
    h.field("to_instance_id", &candidate.to_instance_id);
    h.field("name", candidate.name.as_deref().unwrap_or(""));
    // Fixed-precision so float formatting noise cannot flip NO-OP vs UPDATE.
    h.field("confidence", &format!("{:.4}", candidate.confidence));
    h.field("source_file", &candidate.evidence.source_file);
    h.field("line_start", &candidate.evidence.line_start.to_string());
    h.field("line_end", &candidate.evidence.line_end.to_string());
    h.finish()
}

/// Canonicalized digest of a governing document: CRLF folded to LF and
/// per-line trailing whitespace stripped, so editor churn does not read as
/// spec drift between epochs.
pub fn canonical_document_hash(text: &str) -> String {
    let canonical: String = text
        .replace("\r\n", "\n")
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(7 + digest.len() * 2);
    out.push_str("sha256:");
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
