//! Idempotent upsert service: validate, resolve, hash, write, classify, log.
//!
//! The per-record contract (spec order matters):
//! 1. validate the instance id shape before any store access,
//! 2. for relationships, resolve both endpoints within the project scope —
//!    a missing endpoint is a hard referential error, not a skip,
//! 3. compute the content hash,
//! 4. one atomic insert-or-update keyed on `(project_id, instance_id)`,
//! 5. classify CREATE / UPDATE / NO-OP,
//! 6. append exactly one ledger entry on CREATE or UPDATE — never on NO-OP.

use crate::epoch::EpochService;
use crate::ledger::ShadowLedger;
use crate::primary::PrimaryStore;
use std::sync::Arc;
use tracegraph_model::{
    entity_content_hash, relationship_content_hash, validate_entity_instance_id, EntityCandidate,
    EntityRecord, LedgerEntry, LedgerKind, LedgerOp, RelationshipCandidate, RelationshipRecord,
    Result, TraceError, UpsertOutcome,
};

/// Per-record outcomes of a batch, classified on each record's own key.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub created: usize,
    pub updated: usize,
    pub noop: usize,
    /// `(instance_id, error)` for every failed record.
    pub failures: Vec<(String, TraceError)>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn tally(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Noop => self.noop += 1,
        }
    }
}

/// Content-addressed idempotent writes against the primary store, with the
/// shadow ledger and epoch stamping wired in.
pub struct UpsertService {
    project_id: String,
    store: Arc<PrimaryStore>,
    ledger: Arc<ShadowLedger>,
    epochs: Arc<EpochService>,
}

impl UpsertService {
    pub fn new(
        project_id: impl Into<String>,
        store: Arc<PrimaryStore>,
        ledger: Arc<ShadowLedger>,
        epochs: Arc<EpochService>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            store,
            ledger,
            epochs,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn store(&self) -> &Arc<PrimaryStore> {
        &self.store
    }

    // ========================================================================
    // Entities
    // ========================================================================

    pub fn upsert_entity(
        &self,
        candidate: &EntityCandidate,
    ) -> Result<(EntityRecord, UpsertOutcome)> {
        // Re-assert the id shape; candidates are plain data and may not have
        // come through the validated constructor.
        validate_entity_instance_id(&candidate.instance_id)?;

        let content_hash = entity_content_hash(candidate);
        let (record, outcome) =
            self.store
                .upsert_entity(&self.project_id, candidate, &content_hash);

        match outcome {
            UpsertOutcome::Noop => {}
            UpsertOutcome::Created => {
                self.epochs.record_create(
                    LedgerKind::Entity,
                    candidate.entity_type.as_str(),
                    &candidate.instance_id,
                )?;
                self.append_record_entry(
                    LedgerOp::Create,
                    LedgerKind::Entity,
                    candidate.entity_type.as_str(),
                    record.id,
                    &record.instance_id,
                    &record.content_hash,
                    &record.evidence,
                )?;
            }
            UpsertOutcome::Updated => {
                self.append_record_entry(
                    LedgerOp::Update,
                    LedgerKind::Entity,
                    candidate.entity_type.as_str(),
                    record.id,
                    &record.instance_id,
                    &record.content_hash,
                    &record.evidence,
                )?;
            }
        }
        Ok((record, outcome))
    }

    /// Sequential per-record batch; a failed record is reported on its own
    /// key and does not abort the rest.
    pub fn batch_upsert_entities(&self, candidates: &[EntityCandidate]) -> BatchReport {
        let mut report = BatchReport::default();
        for candidate in candidates {
            match self.upsert_entity(candidate) {
                Ok((_, outcome)) => report.tally(outcome),
                Err(err) => {
                    tracing::warn!(
                        instance_id = %candidate.instance_id,
                        error = %err,
                        "entity upsert failed"
                    );
                    report.failures.push((candidate.instance_id.clone(), err));
                }
            }
        }
        report
    }

    pub fn get_entity_by_instance_id(&self, instance_id: &str) -> Option<EntityRecord> {
        self.store
            .get_entity_by_instance_id(&self.project_id, instance_id)
    }

    pub fn query_entities_by_type(&self, type_code: &str) -> Vec<EntityRecord> {
        self.store.query_entities_by_type(&self.project_id, type_code)
    }

    pub fn count_entities_by_type(&self) -> std::collections::BTreeMap<String, u64> {
        self.store.count_entities_by_type(&self.project_id)
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    pub fn upsert_relationship(
        &self,
        candidate: &RelationshipCandidate,
    ) -> Result<(RelationshipRecord, UpsertOutcome)> {
        // Re-assert the composite key shape; candidates are plain data and
        // may not have come through the validated constructor.
        let expected = format!(
            "{}:{}:{}",
            candidate.relationship_type.as_str(),
            candidate.from_instance_id,
            candidate.to_instance_id
        );
        if candidate.instance_id != expected {
            return Err(TraceError::InvalidInstanceId {
                instance_id: candidate.instance_id.clone(),
                reason: format!("expected {{TYPE}}:{{from}}:{{to}} = {expected:?}"),
            });
        }

        // Endpoint resolution is the one place this write can fail with a
        // referential error.
        let from_entity_id = self
            .store
            .resolve_entity_id(&self.project_id, &candidate.from_instance_id)
            .ok_or_else(|| TraceError::MissingEndpoint {
                relationship_type: candidate.relationship_type.as_str().to_string(),
                instance_id: candidate.instance_id.clone(),
                endpoint: "from",
                missing_instance_id: candidate.from_instance_id.clone(),
                project_id: self.project_id.clone(),
            })?;
        let to_entity_id = self
            .store
            .resolve_entity_id(&self.project_id, &candidate.to_instance_id)
            .ok_or_else(|| TraceError::MissingEndpoint {
                relationship_type: candidate.relationship_type.as_str().to_string(),
                instance_id: candidate.instance_id.clone(),
                endpoint: "to",
                missing_instance_id: candidate.to_instance_id.clone(),
                project_id: self.project_id.clone(),
            })?;

        let content_hash = relationship_content_hash(candidate);
        let (record, outcome) = self.store.upsert_relationship(
            &self.project_id,
            candidate,
            from_entity_id,
            to_entity_id,
            &content_hash,
        );

        match outcome {
            UpsertOutcome::Noop => {}
            UpsertOutcome::Created => {
                self.epochs.record_create(
                    LedgerKind::Relationship,
                    candidate.relationship_type.as_str(),
                    &candidate.instance_id,
                )?;
                self.append_record_entry(
                    LedgerOp::Create,
                    LedgerKind::Relationship,
                    candidate.relationship_type.as_str(),
                    record.id,
                    &record.instance_id,
                    &record.content_hash,
                    &record.evidence,
                )?;
            }
            UpsertOutcome::Updated => {
                self.append_record_entry(
                    LedgerOp::Update,
                    LedgerKind::Relationship,
                    candidate.relationship_type.as_str(),
                    record.id,
                    &record.instance_id,
                    &record.content_hash,
                    &record.evidence,
                )?;
            }
        }
        Ok((record, outcome))
    }

    pub fn batch_upsert_relationships(
        &self,
        candidates: &[RelationshipCandidate],
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for candidate in candidates {
            match self.upsert_relationship(candidate) {
                Ok((_, outcome)) => report.tally(outcome),
                Err(err) => {
                    tracing::warn!(
                        instance_id = %candidate.instance_id,
                        error = %err,
                        "relationship upsert failed"
                    );
                    report.failures.push((candidate.instance_id.clone(), err));
                }
            }
        }
        report
    }

    pub fn get_relationship_by_instance_id(&self, instance_id: &str) -> Option<RelationshipRecord> {
        self.store
            .get_relationship_by_instance_id(&self.project_id, instance_id)
    }

    pub fn query_relationships_by_type(&self, type_code: &str) -> Vec<RelationshipRecord> {
        self.store
            .query_relationships_by_type(&self.project_id, type_code)
    }

    pub fn count_relationships_by_type(&self) -> std::collections::BTreeMap<String, u64> {
        self.store.count_relationships_by_type(&self.project_id)
    }

    // ========================================================================
    // Ledger plumbing
    // ========================================================================

    /// One entry per CREATE/UPDATE, appended strictly after the store write.
    #[allow(clippy::too_many_arguments)]
    fn append_record_entry(
        &self,
        operation: LedgerOp,
        kind: LedgerKind,
        type_code: &str,
        entity_id: u64,
        instance_id: &str,
        content_hash: &str,
        evidence: &tracegraph_model::EvidenceAnchor,
    ) -> Result<()> {
        let prov = self.epochs.provenance();
        let entry = LedgerEntry {
            timestamp: chrono::Utc::now(),
            operation,
            kind,
            type_code: Some(type_code.to_string()),
            entity_id: Some(entity_id),
            instance_id: Some(instance_id.to_string()),
            content_hash: Some(content_hash.to_string()),
            evidence: Some(evidence.clone()),
            detail: None,
            project_id: self.project_id.clone(),
            epoch_id: self.epochs.current_epoch_id(),
            repo_sha: prov.repo_sha.clone(),
            runner_sha: prov.runner_sha.clone(),
            brd_hash: prov.brd_hash.clone(),
        };
        self.ledger.append(&entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::RunProvenance;
    use tempfile::tempdir;
    use tracegraph_model::{
        Attributes, ErrorKind, EvidenceAnchor, ExtractedEntity, ExtractedRelationship,
        TypeRegistry,
    };

    fn harness(dir: &std::path::Path) -> (UpsertService, Arc<ShadowLedger>, Arc<EpochService>) {
        let store = Arc::new(PrimaryStore::new());
        let ledger = Arc::new(ShadowLedger::new(dir.join("ledger")));
        let epochs = Arc::new(EpochService::new(
            "proj",
            Arc::clone(&ledger),
            dir.join("epochs"),
            RunProvenance::new("repo", "runner", "brd"),
        ));
        let svc = UpsertService::new("proj", store, Arc::clone(&ledger), Arc::clone(&epochs));
        (svc, ledger, epochs)
    }

    fn entity(instance_id: &str, name: &str, line_start: u32) -> EntityCandidate {
        let registry = TypeRegistry::codebase_traceability();
        EntityCandidate::from_extracted(
            &registry,
            ExtractedEntity {
                entity_type: "SOURCE_FILE".to_string(),
                instance_id: instance_id.to_string(),
                name: name.to_string(),
                attributes: Attributes::new(),
                source_file: instance_id.to_string(),
                line_start,
                line_end: line_start,
            },
            "v1",
        )
        .unwrap()
    }

    fn relationship(from: &str, to: &str, line_start: u32) -> RelationshipCandidate {
        let registry = TypeRegistry::codebase_traceability();
        RelationshipCandidate::from_extracted(
            &registry,
            ExtractedRelationship {
                relationship_type: "IMPLEMENTS".to_string(),
                instance_id: format!("IMPLEMENTS:{from}:{to}"),
                name: None,
                from_instance_id: from.to_string(),
                to_instance_id: to.to_string(),
                confidence: None,
                source_file: from.to_string(),
                line_start,
                line_end: line_start,
            },
            "v1",
        )
        .unwrap()
    }

    #[test]
    fn test_idempotent_noop_with_single_ledger_entry() {
        let dir = tempdir().unwrap();
        let (svc, ledger, _) = harness(dir.path());

        let cand = entity("src/a.rs", "a.rs", 1);
        let (_, op1) = svc.upsert_entity(&cand).unwrap();
        let (_, op2) = svc.upsert_entity(&cand).unwrap();
        assert_eq!(op1, UpsertOutcome::Created);
        assert_eq!(op2, UpsertOutcome::Noop);

        // NO-OP suppression: exactly one ledger entry for the record.
        let entries = ledger.read_all("proj").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, LedgerOp::Create);
    }

    #[test]
    fn test_entity_evidence_move_is_noop() {
        let dir = tempdir().unwrap();
        let (svc, ledger, _) = harness(dir.path());

        svc.upsert_entity(&entity("src/a.rs", "a.rs", 1)).unwrap();
        let (_, op) = svc.upsert_entity(&entity("src/a.rs", "a.rs", 99)).unwrap();
        assert_eq!(op, UpsertOutcome::Noop);
        assert_eq!(ledger.read_all("proj").unwrap().len(), 1);
    }

    #[test]
    fn test_relationship_evidence_move_is_update() {
        let dir = tempdir().unwrap();
        let (svc, _, _) = harness(dir.path());

        svc.upsert_entity(&entity("src/a.rs", "a.rs", 1)).unwrap();
        svc.upsert_entity(&entity("REQ-1", "Requirement 1", 1)).unwrap();

        let (_, op1) = svc
            .upsert_relationship(&relationship("src/a.rs", "REQ-1", 10))
            .unwrap();
        let (_, op2) = svc
            .upsert_relationship(&relationship("src/a.rs", "REQ-1", 11))
            .unwrap();
        assert_eq!(op1, UpsertOutcome::Created);
        assert_eq!(op2, UpsertOutcome::Updated);
    }

    #[test]
    fn test_hand_built_entity_with_malformed_id_is_rejected() {
        let dir = tempdir().unwrap();
        let (svc, ledger, _) = harness(dir.path());

        // Bypass the boundary constructor by mutating the public field.
        let mut cand = entity("src/a.rs", "a.rs", 1);
        cand.instance_id = "src/a rs".to_string();

        let err = svc.upsert_entity(&cand).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(ledger.read_all("proj").unwrap().is_empty());
        assert!(svc.get_entity_by_instance_id("src/a rs").is_none());
    }

    #[test]
    fn test_missing_endpoint_is_referential_error_without_ledger_entry() {
        let dir = tempdir().unwrap();
        let (svc, ledger, _) = harness(dir.path());

        svc.upsert_entity(&entity("src/a.rs", "a.rs", 1)).unwrap();
        let before = ledger.read_all("proj").unwrap().len();

        let err = svc
            .upsert_relationship(&relationship("src/a.rs", "REQ-missing", 1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Referential);
        assert!(err.to_string().contains("REQ-missing"));
        assert_eq!(ledger.read_all("proj").unwrap().len(), before);
    }

    #[test]
    fn test_batch_classifies_partial_failures_per_key() {
        let dir = tempdir().unwrap();
        let (svc, _, _) = harness(dir.path());

        svc.upsert_entity(&entity("src/a.rs", "a.rs", 1)).unwrap();
        svc.upsert_entity(&entity("REQ-1", "Requirement 1", 1)).unwrap();

        let batch = vec![
            relationship("src/a.rs", "REQ-1", 1),
            relationship("src/a.rs", "REQ-2", 1), // REQ-2 does not exist
        ];
        let report = svc.batch_upsert_relationships(&batch);
        assert_eq!(report.created, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "IMPLEMENTS:src/a.rs:REQ-2");
    }

    #[test]
    fn test_ledger_entries_stamped_with_active_epoch() {
        let dir = tempdir().unwrap();
        let (svc, ledger, epochs) = harness(dir.path());

        let epoch = epochs.start_epoch().unwrap();
        svc.upsert_entity(&entity("src/a.rs", "a.rs", 1)).unwrap();
        epochs.complete_epoch().unwrap();

        let entries = ledger.read_all("proj").unwrap();
        assert_eq!(entries[0].epoch_id, Some(epoch.epoch_id));
        assert_eq!(entries[0].repo_sha, "repo");
    }

    #[test]
    fn test_query_surface() {
        let dir = tempdir().unwrap();
        let (svc, _, _) = harness(dir.path());

        svc.upsert_entity(&entity("src/a.rs", "a.rs", 1)).unwrap();
        svc.upsert_entity(&entity("src/b.rs", "b.rs", 1)).unwrap();

        assert!(svc.get_entity_by_instance_id("src/a.rs").is_some());
        assert_eq!(svc.query_entities_by_type("SOURCE_FILE").len(), 2);
        assert_eq!(svc.count_entities_by_type().get("SOURCE_FILE"), Some(&2));
    }
}
