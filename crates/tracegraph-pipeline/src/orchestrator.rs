//! The pipeline orchestrator: one epoch, ordered stages, structured
//! retry/escalation, DECISION bracketing.

use crate::provider::{Extraction, ExtractionContext};
use crate::stage::{RelationshipPolicy, Stage, StageReport};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracegraph_model::{
    EntityCandidate, ErrorKind, LedgerEntry, LedgerKind, RelationshipCandidate, TypeRegistry,
};
use tracegraph_store::{EpochService, ShadowLedger, UpsertService};
use tracegraph_sync::{GraphSynchronizer, Reconciler, SyncReport};

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub project_id: String,
    pub repo_root: PathBuf,
    /// Stamped into every evidence anchor produced this run.
    pub extractor_version: String,
    /// Abort remaining stages on the first fatal stage failure, or continue
    /// and aggregate.
    pub fail_fast: bool,
    /// Sample size for the validation stage's type-consistency check.
    pub reconcile_sample: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project_id: "default".to_string(),
            repo_root: PathBuf::from("."),
            extractor_version: env!("CARGO_PKG_VERSION").to_string(),
            fail_fast: false,
            reconcile_sample: 100,
        }
    }
}

/// Aggregated result of one run.
#[derive(Debug)]
pub struct PipelineReport {
    pub success: bool,
    pub stages: Vec<StageReport>,
    pub epoch: Option<tracegraph_model::Epoch>,
    pub sync: SyncReport,
    pub reconciliation: Option<tracegraph_sync::ReconciliationReport>,
}

/// Owns the services a run needs and drives the stage sequence.
pub struct Pipeline {
    config: PipelineConfig,
    registry: TypeRegistry,
    upserts: Arc<UpsertService>,
    epochs: Arc<EpochService>,
    ledger: Arc<ShadowLedger>,
    synchronizer: Arc<GraphSynchronizer>,
    reconciler: Arc<Reconciler>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        registry: TypeRegistry,
        upserts: Arc<UpsertService>,
        epochs: Arc<EpochService>,
        ledger: Arc<ShadowLedger>,
        synchronizer: Arc<GraphSynchronizer>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            config,
            registry,
            upserts,
            epochs,
            ledger,
            synchronizer,
            reconciler,
        }
    }

    /// Execute the dependency-ordered stage sequence, then secondary sync and
    /// validation (both skipped after a `fail_fast` abort). Exactly one epoch
    /// brackets the whole run.
    pub fn execute(&self, stages: &[Stage]) -> anyhow::Result<PipelineReport> {
        let owns_epoch = self.epochs.get_current_epoch().is_none();
        if owns_epoch {
            self.epochs.start_epoch()?;
        }
        self.append_decision("pipeline started")?;

        match self.run_stages(stages) {
            Ok(report) => {
                self.append_decision(if report.success {
                    "pipeline completed"
                } else {
                    "pipeline completed with failures"
                })?;
                let epoch = if owns_epoch {
                    if report.success {
                        Some(self.epochs.complete_epoch()?)
                    } else {
                        self.epochs.fail_epoch("one or more stages failed")?
                    }
                } else {
                    None
                };
                Ok(PipelineReport { epoch, ..report })
            }
            Err(err) => {
                // Safety net: the epoch is always terminated, even when the
                // orchestrator itself errors out.
                let _ = self.append_decision(&format!("pipeline aborted: {err}"));
                if owns_epoch {
                    let _ = self.epochs.fail_epoch(&err.to_string());
                }
                Err(err)
            }
        }
    }

    fn run_stages(&self, stages: &[Stage]) -> anyhow::Result<PipelineReport> {
        let ctx = ExtractionContext {
            project_id: self.config.project_id.clone(),
            repo_root: self.config.repo_root.clone(),
        };

        let mut reports = Vec::new();
        let mut all_ok = true;

        for stage in stages {
            let report = self.run_extraction_stage(stage, &ctx);
            let failed = !report.success;
            reports.push(report);
            if failed {
                if self.config.fail_fast {
                    // A known-partial primary state must not be projected into
                    // the secondary store; sync and validation are skipped too.
                    tracing::error!(stage = %stage.name, "fail_fast: aborting remaining stages");
                    return Ok(PipelineReport {
                        success: false,
                        stages: reports,
                        epoch: None,
                        sync: SyncReport::default(),
                        reconciliation: None,
                    });
                }
                all_ok = false;
            }
        }

        // In aggregate mode, secondary sync and validation run over whatever
        // extraction managed to write; they are reported as stages of their
        // own.
        let (sync, sync_report) = self.run_sync_stage();
        let failed_sync = !sync_report.success;
        reports.push(sync_report);
        if failed_sync {
            all_ok = false;
        }

        let (reconciliation, validation_report) = self.run_validation_stage();
        if !validation_report.success {
            all_ok = false;
        }
        reports.push(validation_report);

        Ok(PipelineReport {
            success: all_ok,
            stages: reports,
            epoch: None,
            sync,
            reconciliation: Some(reconciliation),
        })
    }

    // ========================================================================
    // Extraction stages
    // ========================================================================

    fn run_extraction_stage(&self, stage: &Stage, ctx: &ExtractionContext) -> StageReport {
        let started = Instant::now();
        let mut report = StageReport::new(&stage.name);
        tracing::info!(stage = %stage.name, "stage started");

        let extraction = match self.extract_with_retry(stage, ctx, &mut report) {
            Some(extraction) => extraction,
            None => {
                report.duration = started.elapsed();
                return report;
            }
        };

        self.apply_extraction(stage, extraction, &mut report);
        report.duration = started.elapsed();
        tracing::info!(
            stage = %report.name,
            success = report.success,
            entities_created = report.entities_created,
            relationships_created = report.relationships_created,
            "stage finished"
        );
        report
    }

    /// Transient failures get exactly one retry; the retry and its outcome
    /// are recorded as warnings so the run stays auditable.
    fn extract_with_retry(
        &self,
        stage: &Stage,
        ctx: &ExtractionContext,
        report: &mut StageReport,
    ) -> Option<Extraction> {
        match stage.provider.extract(ctx) {
            Ok(extraction) => Some(extraction),
            Err(err) if err.kind() == ErrorKind::Transient => {
                let warning = format!("transient failure, retrying once: {err}");
                tracing::warn!(stage = %stage.name, error = %err, "transient failure, retrying");
                report.warnings.push(warning.clone());
                self.append_signal(&stage.name, &warning);

                match stage.provider.extract(ctx) {
                    Ok(extraction) => {
                        let outcome = "retry succeeded".to_string();
                        report.warnings.push(outcome.clone());
                        self.append_signal(&stage.name, &outcome);
                        Some(extraction)
                    }
                    Err(err) => {
                        report.fail(format!("transient failure persisted after retry: {err}"));
                        self.append_signal(&stage.name, "retry failed");
                        None
                    }
                }
            }
            Err(err) => {
                report.fail(format!("extraction failed: {err}"));
                None
            }
        }
    }

    fn apply_extraction(&self, stage: &Stage, extraction: Extraction, report: &mut StageReport) {
        // Entities first; relationships can only resolve against them.
        for raw in extraction.entities {
            let instance_id = raw.instance_id.clone();
            match EntityCandidate::from_extracted(
                &self.registry,
                raw,
                &self.config.extractor_version,
            ) {
                Ok(candidate) => match self.upserts.upsert_entity(&candidate) {
                    Ok((_, tracegraph_model::UpsertOutcome::Created)) => {
                        report.entities_created += 1
                    }
                    Ok(_) => {}
                    Err(err) => report.fail(format!("entity {instance_id:?}: {err}")),
                },
                Err(err) => report.fail(format!("entity {instance_id:?}: {err}")),
            }
        }

        for raw in extraction.relationships {
            let instance_id = raw.instance_id.clone();
            match RelationshipCandidate::from_extracted(
                &self.registry,
                raw,
                &self.config.extractor_version,
            ) {
                Ok(candidate) => match self.upserts.upsert_relationship(&candidate) {
                    Ok((_, tracegraph_model::UpsertOutcome::Created)) => {
                        report.relationships_created += 1
                    }
                    Ok(_) => {}
                    Err(err)
                        if err.kind() == ErrorKind::Referential
                            && stage.relationship_policy == RelationshipPolicy::Optional =>
                    {
                        let warning = format!("skipping optional relationship: {err}");
                        tracing::warn!(stage = %stage.name, error = %err, "optional relationship skipped");
                        report.warnings.push(warning.clone());
                        self.append_signal(&stage.name, &warning);
                    }
                    Err(err) => report.fail(format!("relationship {instance_id:?}: {err}")),
                },
                Err(err) => report.fail(format!("relationship {instance_id:?}: {err}")),
            }
        }
    }

    // ========================================================================
    // Engine stages
    // ========================================================================

    fn run_sync_stage(&self) -> (SyncReport, StageReport) {
        let started = Instant::now();
        let mut report = StageReport::new("secondary-store-sync");
        let sync = self.synchronizer.sync_merge(&self.config.project_id);
        if sync.skipped > 0 {
            report
                .warnings
                .push(format!("{} records skipped during merge sync", sync.skipped));
        }
        report.duration = started.elapsed();
        (sync, report)
    }

    fn run_validation_stage(&self) -> (tracegraph_sync::ReconciliationReport, StageReport) {
        let started = Instant::now();
        let mut report = StageReport::new("validation");
        let reconciliation = self
            .reconciler
            .verify_cross_store_consistency(&self.config.project_id, self.config.reconcile_sample);

        if !reconciliation.consistent {
            for m in &reconciliation.count_mismatches {
                report.fail(format!(
                    "count mismatch for {} {:?}: primary={} secondary={}",
                    match m.kind {
                        tracegraph_sync::RecordKind::Entity => "entity",
                        tracegraph_sync::RecordKind::Relationship => "relationship",
                    },
                    m.type_code,
                    m.primary_count,
                    m.secondary_count
                ));
            }
            for d in &reconciliation.id_set_diffs {
                report.fail(format!(
                    "id-set drift for {:?}: only_in_primary={:?} only_in_secondary={:?}",
                    d.type_code, d.only_in_primary, d.only_in_secondary
                ));
            }
            for t in &reconciliation.type_mismatches {
                report.fail(format!(
                    "type mismatch for {:?}: primary={:?} secondary={:?}",
                    t.instance_id, t.primary_type, t.secondary_type
                ));
            }
        }
        report.duration = started.elapsed();
        (reconciliation, report)
    }

    // ========================================================================
    // Ledger bracketing
    // ========================================================================

    fn append_decision(&self, detail: &str) -> anyhow::Result<()> {
        let prov = self.epochs.provenance();
        self.ledger.append(&LedgerEntry::decision(
            &self.config.project_id,
            self.epochs.current_epoch_id(),
            detail,
            &prov.repo_sha,
            &prov.runner_sha,
            &prov.brd_hash,
        ))?;
        Ok(())
    }

    /// Advisory signal entry; failures here must not fail the stage.
    fn append_signal(&self, stage: &str, detail: &str) {
        let prov = self.epochs.provenance();
        let mut entry = LedgerEntry::decision(
            &self.config.project_id,
            self.epochs.current_epoch_id(),
            &format!("[{stage}] {detail}"),
            &prov.repo_sha,
            &prov.runner_sha,
            &prov.brd_hash,
        );
        entry.kind = LedgerKind::Signal;
        if let Err(err) = self.ledger.append(&entry) {
            tracing::warn!(error = %err, "failed to append signal entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ExtractionProvider, FilesystemInventoryProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tracegraph_graph::GraphStore;
    use tracegraph_model::{EpochStatus, TraceError};
    use tracegraph_store::{PrimaryStore, RunProvenance, StoreConfig};

    fn harness(dir: &std::path::Path, repo: &std::path::Path, fail_fast: bool) -> Pipeline {
        let store_config = StoreConfig::new(dir);
        let primary = Arc::new(PrimaryStore::new());
        let graph = Arc::new(GraphStore::new());
        let ledger = Arc::new(ShadowLedger::new(store_config.ledger_dir()));
        let epochs = Arc::new(EpochService::new(
            "proj",
            Arc::clone(&ledger),
            store_config.epochs_dir(),
            RunProvenance::new("repo", "runner", "brd"),
        ));
        let upserts = Arc::new(UpsertService::new(
            "proj",
            Arc::clone(&primary),
            Arc::clone(&ledger),
            Arc::clone(&epochs),
        ));
        let synchronizer = Arc::new(GraphSynchronizer::new(
            Arc::clone(&primary),
            Arc::clone(&graph),
        ));
        let reconciler = Arc::new(Reconciler::new(primary, graph));

        Pipeline::new(
            PipelineConfig {
                project_id: "proj".to_string(),
                repo_root: repo.to_path_buf(),
                extractor_version: "test".to_string(),
                fail_fast,
                reconcile_sample: 100,
            },
            TypeRegistry::codebase_traceability(),
            upserts,
            epochs,
            ledger,
            synchronizer,
            reconciler,
        )
    }

    fn demo_repo() -> tempfile::TempDir {
        let repo = tempdir().unwrap();
        std::fs::create_dir(repo.path().join("src")).unwrap();
        std::fs::write(repo.path().join("src/a.rs"), "fn a() {}").unwrap();
        std::fs::write(repo.path().join("src/b.rs"), "fn b() {}").unwrap();
        repo
    }

    struct FlakyProvider {
        attempts: AtomicUsize,
        fail_times: usize,
    }

    impl ExtractionProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }
        fn extract(&self, _ctx: &ExtractionContext) -> tracegraph_model::Result<Extraction> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                Err(TraceError::transient("connection reset by store"))
            } else {
                Ok(Extraction::default())
            }
        }
    }

    #[test]
    fn test_pipeline_happy_path_completes_epoch() {
        let dir = tempdir().unwrap();
        let repo = demo_repo();
        let pipeline = harness(dir.path(), repo.path(), false);

        let stages = vec![Stage::new(
            "filesystem-inventory",
            Box::new(FilesystemInventoryProvider::source_files()),
            RelationshipPolicy::ProvenanceCritical,
        )];

        let report = pipeline.execute(&stages).unwrap();
        assert!(report.success, "stages: {:?}", report.stages);
        let epoch = report.epoch.unwrap();
        assert_eq!(epoch.status, EpochStatus::Completed);
        let counts = epoch.counts.unwrap();
        assert_eq!(counts.entities_created, 3);
        assert_eq!(counts.relationships_created, 2);
        // Both stores agree after the sync stage.
        assert!(report.reconciliation.unwrap().consistent);
    }

    #[test]
    fn test_rerun_is_noop_with_identical_ledger_tail() {
        let dir = tempdir().unwrap();
        let repo = demo_repo();
        let pipeline = harness(dir.path(), repo.path(), false);

        let stages = || {
            vec![Stage::new(
                "filesystem-inventory",
                Box::new(FilesystemInventoryProvider::source_files()),
                RelationshipPolicy::ProvenanceCritical,
            )]
        };

        let first = pipeline.execute(&stages()).unwrap();
        assert_eq!(first.epoch.unwrap().counts.unwrap().entities_created, 3);

        let second = pipeline.execute(&stages()).unwrap();
        let counts = second.epoch.unwrap().counts.unwrap();
        // Unchanged source: everything is a NO-OP, nothing new in the ledger.
        assert_eq!(counts.entities_created, 0);
        assert_eq!(counts.entities_updated, 0);
        assert_eq!(counts.relationships_created, 0);
    }

    #[test]
    fn test_transient_failure_retried_once_with_warning_trail() {
        let dir = tempdir().unwrap();
        let repo = demo_repo();
        let pipeline = harness(dir.path(), repo.path(), false);

        let stages = vec![Stage::new(
            "flaky",
            Box::new(FlakyProvider {
                attempts: AtomicUsize::new(0),
                fail_times: 1,
            }),
            RelationshipPolicy::Optional,
        )];

        let report = pipeline.execute(&stages).unwrap();
        assert!(report.success);
        let flaky = &report.stages[0];
        assert!(flaky.success);
        assert!(flaky.warnings.iter().any(|w| w.contains("retrying")));
        assert!(flaky.warnings.iter().any(|w| w.contains("retry succeeded")));
    }

    #[test]
    fn test_transient_failure_twice_fails_stage_and_epoch() {
        let dir = tempdir().unwrap();
        let repo = demo_repo();
        let pipeline = harness(dir.path(), repo.path(), false);

        let stages = vec![Stage::new(
            "flaky",
            Box::new(FlakyProvider {
                attempts: AtomicUsize::new(0),
                fail_times: 2,
            }),
            RelationshipPolicy::Optional,
        )];

        let report = pipeline.execute(&stages).unwrap();
        assert!(!report.success);
        assert!(!report.stages[0].success);
        assert_eq!(report.epoch.unwrap().status, EpochStatus::Failed);
    }

    struct DanglingEdgeProvider;

    impl ExtractionProvider for DanglingEdgeProvider {
        fn name(&self) -> &str {
            "dangling"
        }
        fn extract(&self, _ctx: &ExtractionContext) -> tracegraph_model::Result<Extraction> {
            Ok(Extraction {
                entities: vec![],
                relationships: vec![tracegraph_model::ExtractedRelationship {
                    relationship_type: "REFERENCES".to_string(),
                    instance_id: "REFERENCES:src/a.rs:nowhere".to_string(),
                    name: None,
                    from_instance_id: "src/a.rs".to_string(),
                    to_instance_id: "nowhere".to_string(),
                    confidence: None,
                    source_file: "src/a.rs".to_string(),
                    line_start: 1,
                    line_end: 1,
                }],
            })
        }
    }

    #[test]
    fn test_referential_failure_downgraded_only_for_optional_stages() {
        let dir = tempdir().unwrap();
        let repo = demo_repo();
        let pipeline = harness(dir.path(), repo.path(), false);

        let stages = vec![
            Stage::new(
                "filesystem-inventory",
                Box::new(FilesystemInventoryProvider::source_files()),
                RelationshipPolicy::ProvenanceCritical,
            ),
            Stage::new(
                "optional-references",
                Box::new(DanglingEdgeProvider),
                RelationshipPolicy::Optional,
            ),
        ];
        let report = pipeline.execute(&stages).unwrap();
        assert!(report.success);
        assert!(report.stages[1].warnings.iter().any(|w| w.contains("nowhere")));

        // Same failure class in a provenance-critical stage is fatal.
        let dir2 = tempdir().unwrap();
        let pipeline = harness(dir2.path(), repo.path(), false);
        let stages = vec![
            Stage::new(
                "filesystem-inventory",
                Box::new(FilesystemInventoryProvider::source_files()),
                RelationshipPolicy::ProvenanceCritical,
            ),
            Stage::new(
                "critical-references",
                Box::new(DanglingEdgeProvider),
                RelationshipPolicy::ProvenanceCritical,
            ),
        ];
        let report = pipeline.execute(&stages).unwrap();
        assert!(!report.success);
        assert!(report.stages[1]
            .errors
            .iter()
            .any(|e| e.contains("REFERENCES") && e.contains("nowhere")));
    }

    #[test]
    fn test_fail_fast_aborts_remaining_stages() {
        let dir = tempdir().unwrap();
        let repo = demo_repo();
        let pipeline = harness(dir.path(), repo.path(), true);

        let stages = vec![
            Stage::new(
                "flaky",
                Box::new(FlakyProvider {
                    attempts: AtomicUsize::new(0),
                    fail_times: 2,
                }),
                RelationshipPolicy::Optional,
            ),
            Stage::new(
                "filesystem-inventory",
                Box::new(FilesystemInventoryProvider::source_files()),
                RelationshipPolicy::ProvenanceCritical,
            ),
        ];

        let report = pipeline.execute(&stages).unwrap();
        assert!(!report.success);
        // Only the failed stage ran: the inventory stage, the secondary sync,
        // and validation are all skipped so the partial primary state is never
        // projected.
        let names: Vec<&str> = report.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["flaky"]);
        assert_eq!(report.sync, SyncReport::default());
        assert!(report.reconciliation.is_none());
        assert_eq!(report.epoch.unwrap().status, EpochStatus::Failed);
    }

    #[test]
    fn test_decision_entries_bracket_the_run() {
        let dir = tempdir().unwrap();
        let repo = demo_repo();
        let pipeline = harness(dir.path(), repo.path(), false);

        let stages = vec![Stage::new(
            "filesystem-inventory",
            Box::new(FilesystemInventoryProvider::source_files()),
            RelationshipPolicy::ProvenanceCritical,
        )];
        pipeline.execute(&stages).unwrap();

        let entries = pipeline.ledger.read_all("proj").unwrap();
        let decisions: Vec<&str> = entries
            .iter()
            .filter(|e| e.kind == LedgerKind::Pipeline)
            .filter_map(|e| e.detail.as_deref())
            .collect();
        assert_eq!(decisions.first().copied(), Some("pipeline started"));
        assert_eq!(decisions.last().copied(), Some("pipeline completed"));
    }

    #[test]
    fn test_wrong_stage_order_surfaces_in_validation_not_silently() {
        // Relationships extracted before their endpoints exist: hard failure
        // in a critical stage, so the run fails rather than drifting.
        let dir = tempdir().unwrap();
        let repo = demo_repo();
        let pipeline = harness(dir.path(), repo.path(), false);

        let stages = vec![Stage::new(
            "critical-references",
            Box::new(DanglingEdgeProvider),
            RelationshipPolicy::ProvenanceCritical,
        )];
        let report = pipeline.execute(&stages).unwrap();
        assert!(!report.success);
        assert_eq!(report.epoch.unwrap().status, EpochStatus::Failed);
    }
}
