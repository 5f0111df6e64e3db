//! TraceGraph Secondary Store
//!
//! The graph projection of the primary store: nodes and edges addressed by
//! their natural key `(project_id, instance_id)`, with idempotent merge
//! semantics and bincode snapshot persistence.
//!
//! This store is never written directly by extraction; it only receives
//! projections of primary-store state from the synchronizer, and it is the
//! second voice in cross-store reconciliation. Merging the same node or edge
//! twice is always safe; merging an edge whose endpoint node is absent is an
//! error here too, mirroring the primary store's referential rule.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracegraph_model::{Result, TraceError};

/// Node projection of an entity row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub project_id: String,
    pub instance_id: String,
    pub type_code: String,
    pub name: String,
    pub content_hash: String,
}

/// Edge projection of a relationship row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub project_id: String,
    pub instance_id: String,
    pub type_code: String,
    pub from_instance_id: String,
    pub to_instance_id: String,
    pub confidence: f64,
    pub content_hash: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphTables {
    nodes: HashMap<(String, String), GraphNode>,
    edges: HashMap<(String, String), GraphEdge>,
}

/// In-process graph store.
pub struct GraphStore {
    tables: RwLock<GraphTables>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(GraphTables::default()),
        }
    }

    pub fn open(snapshot: &Path) -> Result<Self> {
        if snapshot.exists() {
            let bytes = std::fs::read(snapshot)?;
            let tables: GraphTables =
                bincode::deserialize(&bytes).map_err(|e| TraceError::LedgerCorrupt {
                    path: snapshot.display().to_string(),
                    line_number: 0,
                    reason: format!("graph snapshot decode failed: {e}"),
                })?;
            Ok(Self {
                tables: RwLock::new(tables),
            })
        } else {
            Ok(Self::new())
        }
    }

    pub fn save(&self, snapshot: &Path) -> Result<()> {
        if let Some(parent) = snapshot.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tables = self.tables.read();
        let bytes = bincode::serialize(&*tables)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(snapshot, bytes)?;
        Ok(())
    }

    // ========================================================================
    // Merge (idempotent upsert by natural key)
    // ========================================================================

    /// Upsert-match a node by natural key. Never deletes. Returns `true`
    /// when the node was newly created.
    pub fn merge_node(&self, node: GraphNode) -> bool {
        let mut tables = self.tables.write();
        let key = (node.project_id.clone(), node.instance_id.clone());
        tables.nodes.insert(key, node).is_none()
    }

    /// Upsert-match an edge by natural key. Both endpoint nodes must exist.
    pub fn merge_edge(&self, edge: GraphEdge) -> Result<bool> {
        let mut tables = self.tables.write();
        for (role, endpoint) in [("from", &edge.from_instance_id), ("to", &edge.to_instance_id)] {
            let key = (edge.project_id.clone(), endpoint.clone());
            if !tables.nodes.contains_key(&key) {
                return Err(TraceError::MissingEndpoint {
                    relationship_type: edge.type_code.clone(),
                    instance_id: edge.instance_id.clone(),
                    endpoint: role,
                    missing_instance_id: endpoint.clone(),
                    project_id: edge.project_id.clone(),
                });
            }
        }
        let key = (edge.project_id.clone(), edge.instance_id.clone());
        Ok(tables.edges.insert(key, edge).is_none())
    }

    /// Delete every edge for a project. Replace-sync only; never on the hot
    /// path.
    pub fn delete_project_edges(&self, project_id: &str) -> usize {
        let mut tables = self.tables.write();
        let before = tables.edges.len();
        tables.edges.retain(|(p, _), _| p != project_id);
        before - tables.edges.len()
    }

    // ========================================================================
    // Reconciliation surface
    // ========================================================================

    pub fn count_nodes_by_type(&self, project_id: &str) -> BTreeMap<String, u64> {
        let tables = self.tables.read();
        let mut counts = BTreeMap::new();
        for node in tables.nodes.values() {
            if node.project_id == project_id {
                *counts.entry(node.type_code.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn count_edges_by_type(&self, project_id: &str) -> BTreeMap<String, u64> {
        let tables = self.tables.read();
        let mut counts = BTreeMap::new();
        for edge in tables.edges.values() {
            if edge.project_id == project_id {
                *counts.entry(edge.type_code.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn node_ids_for_type(&self, project_id: &str, type_code: &str) -> BTreeSet<String> {
        self.tables
            .read()
            .nodes
            .values()
            .filter(|n| n.project_id == project_id && n.type_code == type_code)
            .map(|n| n.instance_id.clone())
            .collect()
    }

    pub fn edge_ids_for_type(&self, project_id: &str, type_code: &str) -> BTreeSet<String> {
        self.tables
            .read()
            .edges
            .values()
            .filter(|e| e.project_id == project_id && e.type_code == type_code)
            .map(|e| e.instance_id.clone())
            .collect()
    }

    /// Declared type of a node, by natural key.
    pub fn node_type_of(&self, project_id: &str, instance_id: &str) -> Option<String> {
        self.tables
            .read()
            .nodes
            .get(&(project_id.to_string(), instance_id.to_string()))
            .map(|n| n.type_code.clone())
    }

    pub fn edge_type_of(&self, project_id: &str, instance_id: &str) -> Option<String> {
        self.tables
            .read()
            .edges
            .get(&(project_id.to_string(), instance_id.to_string()))
            .map(|e| e.type_code.clone())
    }

    pub fn node_count(&self, project_id: &str) -> usize {
        self.tables
            .read()
            .nodes
            .values()
            .filter(|n| n.project_id == project_id)
            .count()
    }

    pub fn edge_count(&self, project_id: &str) -> usize {
        self.tables
            .read()
            .edges
            .values()
            .filter(|e| e.project_id == project_id)
            .count()
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn node(project: &str, id: &str, type_code: &str) -> GraphNode {
        GraphNode {
            project_id: project.to_string(),
            instance_id: id.to_string(),
            type_code: type_code.to_string(),
            name: id.to_string(),
            content_hash: "sha256:x".to_string(),
        }
    }

    fn edge(project: &str, from: &str, to: &str) -> GraphEdge {
        GraphEdge {
            project_id: project.to_string(),
            instance_id: format!("CONTAINS:{from}:{to}"),
            type_code: "CONTAINS".to_string(),
            from_instance_id: from.to_string(),
            to_instance_id: to.to_string(),
            confidence: 1.0,
            content_hash: "sha256:y".to_string(),
        }
    }

    #[test]
    fn test_merge_node_is_idempotent() {
        let store = GraphStore::new();
        assert!(store.merge_node(node("p", "a", "SOURCE_FILE")));
        assert!(!store.merge_node(node("p", "a", "SOURCE_FILE")));
        assert_eq!(store.node_count("p"), 1);
    }

    #[test]
    fn test_merge_edge_requires_endpoints() {
        let store = GraphStore::new();
        store.merge_node(node("p", "dir", "DIRECTORY"));

        let err = store.merge_edge(edge("p", "dir", "missing")).unwrap_err();
        assert!(err.to_string().contains("missing"));

        store.merge_node(node("p", "file", "SOURCE_FILE"));
        assert!(store.merge_edge(edge("p", "dir", "file")).unwrap());
        assert!(!store.merge_edge(edge("p", "dir", "file")).unwrap());
    }

    #[test]
    fn test_delete_project_edges_is_project_scoped() {
        let store = GraphStore::new();
        for p in ["p1", "p2"] {
            store.merge_node(node(p, "dir", "DIRECTORY"));
            store.merge_node(node(p, "file", "SOURCE_FILE"));
            store.merge_edge(edge(p, "dir", "file")).unwrap();
        }
        assert_eq!(store.delete_project_edges("p1"), 1);
        assert_eq!(store.edge_count("p1"), 0);
        assert_eq!(store.edge_count("p2"), 1);
        // Nodes are untouched by edge replacement.
        assert_eq!(store.node_count("p1"), 2);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.bin");

        let store = GraphStore::new();
        store.merge_node(node("p", "a", "SOURCE_FILE"));
        store.save(&path).unwrap();

        let reopened = GraphStore::open(&path).unwrap();
        assert_eq!(reopened.node_type_of("p", "a").as_deref(), Some("SOURCE_FILE"));
    }
}
