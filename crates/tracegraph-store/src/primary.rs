//! In-process primary store: conflict-keyed entity/relationship tables with
//! bincode snapshot persistence.
//!
//! `(project_id, instance_id)` is the uniqueness/conflict key for both
//! tables. Each upsert is atomic under the table lock, so two upserts racing
//! on the same key resolve to one CREATE and one UPDATE/NO-OP without any
//! extra locking.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracegraph_model::{
    EntityCandidate, EntityRecord, RelationshipCandidate, RelationshipRecord, Result, TraceError,
    UpsertOutcome,
};

/// On-disk layout for one store root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the snapshot, the ledger stream, and epoch records.
    pub root: PathBuf,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join("primary.bin")
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.root.join("ledger")
    }

    pub fn epochs_dir(&self) -> PathBuf {
        self.root.join("epochs")
    }

    pub fn graph_snapshot_path(&self) -> PathBuf {
        self.root.join("graph.bin")
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    entities: HashMap<(String, String), EntityRecord>,
    relationships: HashMap<(String, String), RelationshipRecord>,
    next_entity_id: u64,
    next_relationship_id: u64,
}

/// The relational store of record.
pub struct PrimaryStore {
    tables: RwLock<Tables>,
}

impl PrimaryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Load a snapshot if one exists, otherwise start empty.
    pub fn open(snapshot: &Path) -> Result<Self> {
        if snapshot.exists() {
            let bytes = std::fs::read(snapshot)?;
            let tables: Tables = bincode::deserialize(&bytes).map_err(|e| {
                TraceError::LedgerCorrupt {
                    path: snapshot.display().to_string(),
                    line_number: 0,
                    reason: format!("snapshot decode failed: {e}"),
                }
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
    // Upserts (atomic per conflict key)
    // ========================================================================

    /// Insert-or-update an entity row. The row is updated only when the
    /// stored hash differs from `content_hash`; otherwise it is left
    /// untouched and the outcome is NO-OP.
    pub fn upsert_entity(
        &self,
        project_id: &str,
        candidate: &EntityCandidate,
        content_hash: &str,
    ) -> (EntityRecord, UpsertOutcome) {
        let mut tables = self.tables.write();
        let key = (project_id.to_string(), candidate.instance_id.clone());
        let now = chrono::Utc::now();

        match tables.entities.get(&key) {
            Some(existing) if existing.content_hash == content_hash => {
                (existing.clone(), UpsertOutcome::Noop)
            }
            Some(existing) => {
                let mut record = existing.clone();
                record.name = candidate.name.clone();
                record.attributes = candidate.attributes.clone();
                record.evidence = candidate.evidence.clone();
                record.content_hash = content_hash.to_string();
                record.updated_at = now;
                tables.entities.insert(key, record.clone());
                (record, UpsertOutcome::Updated)
            }
            None => {
                tables.next_entity_id += 1;
                let record = EntityRecord {
                    id: tables.next_entity_id,
                    project_id: project_id.to_string(),
                    entity_type: candidate.entity_type.clone(),
                    instance_id: candidate.instance_id.clone(),
                    name: candidate.name.clone(),
                    attributes: candidate.attributes.clone(),
                    evidence: candidate.evidence.clone(),
                    content_hash: content_hash.to_string(),
                    created_at: now,
                    updated_at: now,
                };
                tables.entities.insert(key, record.clone());
                (record, UpsertOutcome::Created)
            }
        }
    }

    /// Insert-or-update a relationship row. Endpoints must already be
    /// resolved to internal entity ids.
    pub fn upsert_relationship(
        &self,
        project_id: &str,
        candidate: &RelationshipCandidate,
        from_entity_id: u64,
        to_entity_id: u64,
        content_hash: &str,
    ) -> (RelationshipRecord, UpsertOutcome) {
        let mut tables = self.tables.write();
        let key = (project_id.to_string(), candidate.instance_id.clone());
        let now = chrono::Utc::now();

        match tables.relationships.get(&key) {
            Some(existing) if existing.content_hash == content_hash => {
                (existing.clone(), UpsertOutcome::Noop)
            }
            Some(existing) => {
                let mut record = existing.clone();
                record.name = candidate.name.clone();
                record.from_entity_id = from_entity_id;
                record.to_entity_id = to_entity_id;
                record.confidence = candidate.confidence;
                record.evidence = candidate.evidence.clone();
                record.content_hash = content_hash.to_string();
                record.updated_at = now;
                tables.relationships.insert(key, record.clone());
                (record, UpsertOutcome::Updated)
            }
            None => {
                tables.next_relationship_id += 1;
                let record = RelationshipRecord {
                    id: tables.next_relationship_id,
                    project_id: project_id.to_string(),
                    relationship_type: candidate.relationship_type.clone(),
                    instance_id: candidate.instance_id.clone(),
                    name: candidate.name.clone(),
                    from_entity_id,
                    to_entity_id,
                    from_instance_id: candidate.from_instance_id.clone(),
                    to_instance_id: candidate.to_instance_id.clone(),
                    confidence: candidate.confidence,
                    evidence: candidate.evidence.clone(),
                    content_hash: content_hash.to_string(),
                    created_at: now,
                    updated_at: now,
                };
                tables.relationships.insert(key, record.clone());
                (record, UpsertOutcome::Created)
            }
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Resolve an entity instance id to its internal id within a project.
    pub fn resolve_entity_id(&self, project_id: &str, instance_id: &str) -> Option<u64> {
        self.tables
            .read()
            .entities
            .get(&(project_id.to_string(), instance_id.to_string()))
            .map(|r| r.id)
    }

    pub fn get_entity_by_instance_id(
        &self,
        project_id: &str,
        instance_id: &str,
    ) -> Option<EntityRecord> {
        self.tables
            .read()
            .entities
            .get(&(project_id.to_string(), instance_id.to_string()))
            .cloned()
    }

    pub fn get_relationship_by_instance_id(
        &self,
        project_id: &str,
        instance_id: &str,
    ) -> Option<RelationshipRecord> {
        self.tables
            .read()
            .relationships
            .get(&(project_id.to_string(), instance_id.to_string()))
            .cloned()
    }

    pub fn query_entities_by_type(&self, project_id: &str, type_code: &str) -> Vec<EntityRecord> {
        let mut rows: Vec<EntityRecord> = self
            .tables
            .read()
            .entities
            .values()
            .filter(|r| r.project_id == project_id && r.entity_type.as_str() == type_code)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        rows
    }

    pub fn query_relationships_by_type(
        &self,
        project_id: &str,
        type_code: &str,
    ) -> Vec<RelationshipRecord> {
        let mut rows: Vec<RelationshipRecord> = self
            .tables
            .read()
            .relationships
            .values()
            .filter(|r| r.project_id == project_id && r.relationship_type.as_str() == type_code)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        rows
    }

    /// Per-type entity counts for one project.
    pub fn count_entities_by_type(&self, project_id: &str) -> BTreeMap<String, u64> {
        let tables = self.tables.read();
        let mut counts = BTreeMap::new();
        for record in tables.entities.values() {
            if record.project_id == project_id {
                *counts
                    .entry(record.entity_type.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn count_relationships_by_type(&self, project_id: &str) -> BTreeMap<String, u64> {
        let tables = self.tables.read();
        let mut counts = BTreeMap::new();
        for record in tables.relationships.values() {
            if record.project_id == project_id {
                *counts
                    .entry(record.relationship_type.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }
        counts
    }

    /// Natural-key set for one entity type (reconciliation input).
    pub fn entity_ids_for_type(&self, project_id: &str, type_code: &str) -> BTreeSet<String> {
        self.tables
            .read()
            .entities
            .values()
            .filter(|r| r.project_id == project_id && r.entity_type.as_str() == type_code)
            .map(|r| r.instance_id.clone())
            .collect()
    }

    pub fn relationship_ids_for_type(&self, project_id: &str, type_code: &str) -> BTreeSet<String> {
        self.tables
            .read()
            .relationships
            .values()
            .filter(|r| r.project_id == project_id && r.relationship_type.as_str() == type_code)
            .map(|r| r.instance_id.clone())
            .collect()
    }

    /// All entities for a project, ordered by instance id (sync input).
    pub fn entities_for_project(&self, project_id: &str) -> Vec<EntityRecord> {
        let mut rows: Vec<EntityRecord> = self
            .tables
            .read()
            .entities
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        rows
    }

    pub fn relationships_for_project(&self, project_id: &str) -> Vec<RelationshipRecord> {
        let mut rows: Vec<RelationshipRecord> = self
            .tables
            .read()
            .relationships
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        rows
    }
}

impl Default for PrimaryStore {
    fn default() -> Self {
        Self::new()
    }
}
