//! Cross-store reconciliation at three escalating strictness levels.
//!
//! 1. **Count parity** — per-type counts must match; cheap, catches gross
//!    divergence.
//! 2. **ID-set equality** — per type, the natural-key sets must be identical;
//!    catches one-row-swapped-for-another gaps invisible to counts.
//! 3. **Type consistency** — for a sampled subset of keys, the declared type
//!    must agree in both stores; catches mistyped-but-present corruption.
//!
//! The verdict is the conjunction of all three. Every failing type/id is
//! enumerated, bounded by a reporting cap so the report stays usable at
//! scale. Findings are surfaced, never auto-repaired.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracegraph_graph::GraphStore;
use tracegraph_store::PrimaryStore;

/// Default bound on enumerated findings per category.
pub const DEFAULT_REPORT_CAP: usize = 50;

/// Which table a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Entity,
    Relationship,
}

/// Level-1 finding: per-type count divergence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountMismatch {
    pub kind: RecordKind,
    pub type_code: String,
    pub primary_count: u64,
    pub secondary_count: u64,
}

/// Level-2 finding: natural-key set divergence for one type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdSetDiff {
    pub kind: RecordKind,
    pub type_code: String,
    pub only_in_primary: Vec<String>,
    pub only_in_secondary: Vec<String>,
}

impl IdSetDiff {
    pub fn is_empty(&self) -> bool {
        self.only_in_primary.is_empty() && self.only_in_secondary.is_empty()
    }
}

/// Level-3 finding: a key present in both stores with disagreeing types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeMismatch {
    pub kind: RecordKind,
    pub instance_id: String,
    pub primary_type: String,
    pub secondary_type: Option<String>,
}

/// Full reconciliation result. Ephemeral; computed on demand, consumed by
/// CLI output and CI gates, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub project_id: String,
    pub consistent: bool,
    pub count_mismatches: Vec<CountMismatch>,
    pub id_set_diffs: Vec<IdSetDiff>,
    pub type_mismatches: Vec<TypeMismatch>,
    /// Per-category bound applied while enumerating findings.
    pub report_cap: usize,
}

/// Compares the primary and secondary stores.
pub struct Reconciler {
    primary: Arc<PrimaryStore>,
    graph: Arc<GraphStore>,
    report_cap: usize,
}

impl Reconciler {
    pub fn new(primary: Arc<PrimaryStore>, graph: Arc<GraphStore>) -> Self {
        Self {
            primary,
            graph,
            report_cap: DEFAULT_REPORT_CAP,
        }
    }

    pub fn with_report_cap(mut self, cap: usize) -> Self {
        self.report_cap = cap.max(1);
        self
    }

    // ========================================================================
    // Level 1: count parity
    // ========================================================================

    pub fn verify_counts_only(&self, project_id: &str) -> Vec<CountMismatch> {
        let mut mismatches = Vec::new();
        self.count_parity(
            RecordKind::Entity,
            &self.primary.count_entities_by_type(project_id),
            &self.graph.count_nodes_by_type(project_id),
            &mut mismatches,
        );
        self.count_parity(
            RecordKind::Relationship,
            &self.primary.count_relationships_by_type(project_id),
            &self.graph.count_edges_by_type(project_id),
            &mut mismatches,
        );
        mismatches
    }

    fn count_parity(
        &self,
        kind: RecordKind,
        primary: &BTreeMap<String, u64>,
        secondary: &BTreeMap<String, u64>,
        out: &mut Vec<CountMismatch>,
    ) {
        let mut type_codes: Vec<&String> = primary.keys().chain(secondary.keys()).collect();
        type_codes.sort();
        type_codes.dedup();

        for type_code in type_codes {
            if out.len() >= self.report_cap {
                break;
            }
            let p = primary.get(type_code).copied().unwrap_or(0);
            let s = secondary.get(type_code).copied().unwrap_or(0);
            if p != s {
                out.push(CountMismatch {
                    kind,
                    type_code: type_code.clone(),
                    primary_count: p,
                    secondary_count: s,
                });
            }
        }
    }

    // ========================================================================
    // Level 2: ID-set equality
    // ========================================================================

    pub fn verify_id_set_for_type(
        &self,
        project_id: &str,
        kind: RecordKind,
        type_code: &str,
    ) -> IdSetDiff {
        let (primary_ids, secondary_ids) = match kind {
            RecordKind::Entity => (
                self.primary.entity_ids_for_type(project_id, type_code),
                self.graph.node_ids_for_type(project_id, type_code),
            ),
            RecordKind::Relationship => (
                self.primary.relationship_ids_for_type(project_id, type_code),
                self.graph.edge_ids_for_type(project_id, type_code),
            ),
        };

        IdSetDiff {
            kind,
            type_code: type_code.to_string(),
            only_in_primary: primary_ids
                .difference(&secondary_ids)
                .take(self.report_cap)
                .cloned()
                .collect(),
            only_in_secondary: secondary_ids
                .difference(&primary_ids)
                .take(self.report_cap)
                .cloned()
                .collect(),
        }
    }

    fn id_set_diffs(&self, project_id: &str) -> Vec<IdSetDiff> {
        let mut diffs = Vec::new();
        for (kind, types) in [
            (
                RecordKind::Entity,
                self.all_type_codes(
                    &self.primary.count_entities_by_type(project_id),
                    &self.graph.count_nodes_by_type(project_id),
                ),
            ),
            (
                RecordKind::Relationship,
                self.all_type_codes(
                    &self.primary.count_relationships_by_type(project_id),
                    &self.graph.count_edges_by_type(project_id),
                ),
            ),
        ] {
            for type_code in types {
                let diff = self.verify_id_set_for_type(project_id, kind, &type_code);
                if !diff.is_empty() {
                    diffs.push(diff);
                }
            }
        }
        diffs
    }

    fn all_type_codes(
        &self,
        primary: &BTreeMap<String, u64>,
        secondary: &BTreeMap<String, u64>,
    ) -> Vec<String> {
        let mut codes: Vec<String> = primary.keys().chain(secondary.keys()).cloned().collect();
        codes.sort();
        codes.dedup();
        codes
    }

    // ========================================================================
    // Level 3: sampled type consistency
    // ========================================================================

    /// Check declared-type agreement for up to `sample` keys per kind.
    /// Sampling is deterministic (ordered natural keys) so repeated audits
    /// are comparable.
    pub fn verify_type_consistency(&self, project_id: &str, sample: usize) -> Vec<TypeMismatch> {
        let mut mismatches = Vec::new();

        for record in self
            .primary
            .entities_for_project(project_id)
            .into_iter()
            .take(sample)
        {
            if mismatches.len() >= self.report_cap {
                break;
            }
            let secondary_type = self.graph.node_type_of(project_id, &record.instance_id);
            if secondary_type.as_deref() != Some(record.entity_type.as_str()) {
                mismatches.push(TypeMismatch {
                    kind: RecordKind::Entity,
                    instance_id: record.instance_id,
                    primary_type: record.entity_type.as_str().to_string(),
                    secondary_type,
                });
            }
        }

        for record in self
            .primary
            .relationships_for_project(project_id)
            .into_iter()
            .take(sample)
        {
            if mismatches.len() >= self.report_cap {
                break;
            }
            let secondary_type = self.graph.edge_type_of(project_id, &record.instance_id);
            if secondary_type.as_deref() != Some(record.relationship_type.as_str()) {
                mismatches.push(TypeMismatch {
                    kind: RecordKind::Relationship,
                    instance_id: record.instance_id,
                    primary_type: record.relationship_type.as_str().to_string(),
                    secondary_type,
                });
            }
        }

        mismatches
    }

    // ========================================================================
    // Conjunction
    // ========================================================================

    /// All three levels; consistent only when every level is clean.
    pub fn verify_cross_store_consistency(
        &self,
        project_id: &str,
        sample: usize,
    ) -> ReconciliationReport {
        let count_mismatches = self.verify_counts_only(project_id);
        let id_set_diffs = self.id_set_diffs(project_id);
        let type_mismatches = self.verify_type_consistency(project_id, sample);

        let consistent =
            count_mismatches.is_empty() && id_set_diffs.is_empty() && type_mismatches.is_empty();

        if !consistent {
            tracing::warn!(
                project_id,
                count_mismatches = count_mismatches.len(),
                id_set_diffs = id_set_diffs.len(),
                type_mismatches = type_mismatches.len(),
                "cross-store drift detected"
            );
        }

        ReconciliationReport {
            project_id: project_id.to_string(),
            consistent,
            count_mismatches,
            id_set_diffs,
            type_mismatches,
            report_cap: self.report_cap,
        }
    }
}
