//! Projects primary-store state into the graph store.
//!
//! Two strategies:
//! - **merge**: idempotent, never deletes, safe on every pipeline run;
//! - **replace (edges)**: destructive maintenance operation that drops a
//!   project's edges and rebuilds them from the primary store in one pass.
//!
//! Neither strategy raises on a single failing record; it is counted as
//! skipped and logged, so one malformed edge cannot abort a project sync.

use std::sync::Arc;
use tracegraph_graph::{GraphEdge, GraphNode, GraphStore};
use tracegraph_model::{EntityCandidate, EntityRecord, RelationshipCandidate, RelationshipRecord};
use tracegraph_store::{BatchReport, PrimaryStore, UpsertService};

/// Per-strategy outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub skipped: usize,
}

/// Primary → graph projection.
pub struct GraphSynchronizer {
    primary: Arc<PrimaryStore>,
    graph: Arc<GraphStore>,
}

fn node_of(record: &EntityRecord) -> GraphNode {
    GraphNode {
        project_id: record.project_id.clone(),
        instance_id: record.instance_id.clone(),
        type_code: record.entity_type.as_str().to_string(),
        name: record.name.clone(),
        content_hash: record.content_hash.clone(),
    }
}

fn edge_of(record: &RelationshipRecord) -> GraphEdge {
    GraphEdge {
        project_id: record.project_id.clone(),
        instance_id: record.instance_id.clone(),
        type_code: record.relationship_type.as_str().to_string(),
        from_instance_id: record.from_instance_id.clone(),
        to_instance_id: record.to_instance_id.clone(),
        confidence: record.confidence,
        content_hash: record.content_hash.clone(),
    }
}

impl GraphSynchronizer {
    pub fn new(primary: Arc<PrimaryStore>, graph: Arc<GraphStore>) -> Self {
        Self { primary, graph }
    }

    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    /// Merge-sync a project: nodes first, then edges, so an edge never
    /// arrives before its endpoints.
    pub fn sync_merge(&self, project_id: &str) -> SyncReport {
        let mut report = SyncReport::default();

        for record in self.primary.entities_for_project(project_id) {
            self.graph.merge_node(node_of(&record));
            report.synced += 1;
        }

        for record in self.primary.relationships_for_project(project_id) {
            match self.graph.merge_edge(edge_of(&record)) {
                Ok(_) => report.synced += 1,
                Err(err) => {
                    report.skipped += 1;
                    tracing::warn!(
                        project_id,
                        instance_id = %record.instance_id,
                        error = %err,
                        "skipping edge during merge sync"
                    );
                }
            }
        }

        tracing::info!(project_id, synced = report.synced, skipped = report.skipped, "merge sync done");
        report
    }

    /// Batch-upsert into the primary store, then merge-sync the project so
    /// both stores move together. The upsert service must be scoped to the
    /// same primary store this synchronizer projects from.
    pub fn batch_upsert_and_sync(
        &self,
        upserts: &UpsertService,
        entities: &[EntityCandidate],
        relationships: &[RelationshipCandidate],
    ) -> (BatchReport, BatchReport, SyncReport) {
        let entity_report = upserts.batch_upsert_entities(entities);
        let relationship_report = upserts.batch_upsert_relationships(relationships);
        let sync = self.sync_merge(upserts.project_id());
        (entity_report, relationship_report, sync)
    }

    /// Replace-sync a project's edges: delete them all in the graph store,
    /// then recreate from current primary state. Maintenance path only.
    pub fn sync_replace_edges(&self, project_id: &str) -> SyncReport {
        let deleted = self.graph.delete_project_edges(project_id);
        tracing::info!(project_id, deleted, "replace sync: dropped project edges");

        let mut report = SyncReport::default();
        // Nodes are merged first so a freshly repaired graph is self-contained.
        for record in self.primary.entities_for_project(project_id) {
            self.graph.merge_node(node_of(&record));
        }
        for record in self.primary.relationships_for_project(project_id) {
            match self.graph.merge_edge(edge_of(&record)) {
                Ok(_) => report.synced += 1,
                Err(err) => {
                    report.skipped += 1;
                    tracing::warn!(
                        project_id,
                        instance_id = %record.instance_id,
                        error = %err,
                        "skipping edge during replace sync"
                    );
                }
            }
        }
        report
    }
}
