//! Epoch lifecycle: one bracketed extraction run per project at a time.
//!
//! The service is an explicit, injectable object owning its epoch state (no
//! module-level singletons), so "one running epoch per project" is an
//! invariant of the object rather than a convention.
//!
//! Final counts are never accumulated while the run is in flight. At
//! completion the ledger is re-scanned, strictly, filtered to the finishing
//! epoch id; a crash mid-run therefore cannot leave stale counters behind.

use crate::ledger::ShadowLedger;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracegraph_model::{
    canonical_document_hash, Epoch, EpochCounts, EpochStatus, LedgerKind, LedgerOp, Result,
    TraceError,
};
use uuid::Uuid;

/// Provenance stamped onto every ledger entry and epoch of a run.
#[derive(Debug, Clone)]
pub struct RunProvenance {
    /// Revision of the source repository being extracted.
    pub repo_sha: String,
    /// Revision of the extraction engine itself.
    pub runner_sha: String,
    /// Canonicalized hash of the governing requirements document.
    pub brd_hash: String,
}

impl RunProvenance {
    pub fn new(
        repo_sha: impl Into<String>,
        runner_sha: impl Into<String>,
        brd_hash: impl Into<String>,
    ) -> Self {
        Self {
            repo_sha: repo_sha.into(),
            runner_sha: runner_sha.into(),
            brd_hash: brd_hash.into(),
        }
    }

    /// Capture provenance from the environment: `git rev-parse HEAD` in the
    /// source repository, the engine's own version, and the canonicalized
    /// hash of the governing document (when present).
    pub fn capture(repo_dir: &std::path::Path, brd_path: Option<&std::path::Path>) -> Self {
        let repo_sha = git_head_sha(repo_dir).unwrap_or_else(|| "unknown".to_string());
        let runner_sha = std::env::var("TRACEGRAPH_RUNNER_SHA")
            .unwrap_or_else(|_| format!("tracegraph-{}", env!("CARGO_PKG_VERSION")));
        let brd_hash = brd_path
            .and_then(|p| std::fs::read_to_string(p).ok())
            .map(|text| canonical_document_hash(&text))
            .unwrap_or_else(|| "none".to_string());
        Self {
            repo_sha,
            runner_sha,
            brd_hash,
        }
    }
}

fn git_head_sha(repo_dir: &std::path::Path) -> Option<String> {
    let output = std::process::Command::new("git")
        .arg("-C")
        .arg(repo_dir)
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8(output.stdout).ok()?;
    let sha = sha.trim();
    if sha.is_empty() {
        None
    } else {
        Some(sha.to_string())
    }
}

struct ActiveEpoch {
    epoch: Epoch,
    /// CREATE keys seen in this epoch only; reset on every start.
    seen_creates: HashSet<(LedgerKind, String, String)>,
}

/// Per-project epoch lifecycle service.
pub struct EpochService {
    project_id: String,
    ledger: Arc<ShadowLedger>,
    epochs_dir: PathBuf,
    provenance: RunProvenance,
    current: Mutex<Option<ActiveEpoch>>,
}

impl EpochService {
    pub fn new(
        project_id: impl Into<String>,
        ledger: Arc<ShadowLedger>,
        epochs_dir: impl Into<PathBuf>,
        provenance: RunProvenance,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            ledger,
            epochs_dir: epochs_dir.into(),
            provenance,
            current: Mutex::new(None),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn provenance(&self) -> &RunProvenance {
        &self.provenance
    }

    /// The epoch id ledger entries should be stamped with, if a run is open.
    pub fn current_epoch_id(&self) -> Option<Uuid> {
        self.current.lock().as_ref().map(|a| a.epoch.epoch_id)
    }

    pub fn get_current_epoch(&self) -> Option<Epoch> {
        self.current.lock().as_ref().map(|a| a.epoch.clone())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Begin a run. Fails if one is already running for this service.
    pub fn start_epoch(&self) -> Result<Epoch> {
        let mut current = self.current.lock();
        if let Some(active) = current.as_ref() {
            return Err(TraceError::EpochAlreadyRunning {
                project_id: self.project_id.clone(),
                running_epoch_id: active.epoch.epoch_id,
            });
        }

        let epoch = Epoch {
            epoch_id: Uuid::new_v4(),
            project_id: self.project_id.clone(),
            repo_sha: self.provenance.repo_sha.clone(),
            runner_sha: self.provenance.runner_sha.clone(),
            brd_hash: self.provenance.brd_hash.clone(),
            started_at: chrono::Utc::now(),
            completed_at: None,
            status: EpochStatus::Running,
            counts: None,
            failure_reason: None,
        };
        self.write_epoch_record(&epoch)?;

        tracing::info!(
            epoch_id = %epoch.epoch_id,
            project_id = %self.project_id,
            repo_sha = %epoch.repo_sha,
            "epoch started"
        );

        *current = Some(ActiveEpoch {
            epoch: epoch.clone(),
            seen_creates: HashSet::new(),
        });
        Ok(epoch)
    }

    /// Close the run and derive its final counts from the ledger.
    pub fn complete_epoch(&self) -> Result<Epoch> {
        let mut current = self.current.lock();
        let active = current.take().ok_or_else(|| TraceError::NoActiveEpoch {
            project_id: self.project_id.clone(),
        })?;

        // Authoritative counts: strict replay, filtered to this epoch.
        let entries = self.ledger.read_all(&self.project_id)?;
        let mut counts = EpochCounts::default();
        for entry in entries
            .iter()
            .filter(|e| e.epoch_id == Some(active.epoch.epoch_id))
        {
            match (entry.kind, entry.operation) {
                (LedgerKind::Entity, LedgerOp::Create) => counts.entities_created += 1,
                (LedgerKind::Entity, LedgerOp::Update) => counts.entities_updated += 1,
                (LedgerKind::Relationship, LedgerOp::Create) => counts.relationships_created += 1,
                (LedgerKind::Relationship, LedgerOp::Update) => counts.relationships_updated += 1,
                (LedgerKind::Signal, _) => counts.signals_captured += 1,
                (_, LedgerOp::Decision) => counts.decisions_logged += 1,
                _ => {}
            }
        }

        let mut epoch = active.epoch;
        epoch.completed_at = Some(chrono::Utc::now());
        epoch.status = EpochStatus::Completed;
        epoch.counts = Some(counts);
        self.write_epoch_record(&epoch)?;

        tracing::info!(
            epoch_id = %epoch.epoch_id,
            entities_created = counts.entities_created,
            entities_updated = counts.entities_updated,
            relationships_created = counts.relationships_created,
            relationships_updated = counts.relationships_updated,
            "epoch completed"
        );
        Ok(epoch)
    }

    /// Terminate the run as failed. No count derivation. Safe to call with
    /// no epoch running.
    pub fn fail_epoch(&self, reason: &str) -> Result<Option<Epoch>> {
        let mut current = self.current.lock();
        let Some(active) = current.take() else {
            return Ok(None);
        };

        let mut epoch = active.epoch;
        epoch.completed_at = Some(chrono::Utc::now());
        epoch.status = EpochStatus::Failed;
        epoch.failure_reason = Some(reason.to_string());
        self.write_epoch_record(&epoch)?;

        tracing::warn!(epoch_id = %epoch.epoch_id, reason, "epoch failed");
        Ok(Some(epoch))
    }

    // ========================================================================
    // In-epoch duplicate CREATE detection
    // ========================================================================

    pub fn is_duplicate_create(&self, kind: LedgerKind, type_code: &str, instance_id: &str) -> bool {
        self.current.lock().as_ref().is_some_and(|a| {
            a.seen_creates
                .contains(&(kind, type_code.to_string(), instance_id.to_string()))
        })
    }

    /// Register a CREATE for the current epoch. Registering the same key
    /// twice within one epoch is an extraction bug and returns an error.
    /// A no-op when no epoch is running (ad-hoc upserts outside a run).
    pub fn record_create(
        &self,
        kind: LedgerKind,
        type_code: &str,
        instance_id: &str,
    ) -> Result<()> {
        let mut current = self.current.lock();
        let Some(active) = current.as_mut() else {
            return Ok(());
        };
        let key = (kind, type_code.to_string(), instance_id.to_string());
        if !active.seen_creates.insert(key) {
            return Err(TraceError::DuplicateCreate {
                epoch_id: active.epoch.epoch_id,
                kind: format!("{kind:?}").to_lowercase(),
                type_code: type_code.to_string(),
                instance_id: instance_id.to_string(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Epoch records on disk
    // ========================================================================

    fn write_epoch_record(&self, epoch: &Epoch) -> Result<()> {
        std::fs::create_dir_all(&self.epochs_dir)?;
        let path = self.epochs_dir.join(format!("{}.json", epoch.epoch_id));
        let json = serde_json::to_string_pretty(epoch)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn get_epoch(&self, epoch_id: Uuid) -> Result<Epoch> {
        let path = self.epochs_dir.join(format!("{epoch_id}.json"));
        if !path.exists() {
            return Err(TraceError::EpochNotFound { epoch_id });
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// All epoch records for this project, most recent first.
    pub fn list_epochs(&self) -> Result<Vec<Epoch>> {
        if !self.epochs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut epochs = Vec::new();
        for entry in std::fs::read_dir(&self.epochs_dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == "json") {
                let contents = std::fs::read_to_string(&path)?;
                match serde_json::from_str::<Epoch>(&contents) {
                    Ok(epoch) if epoch.project_id == self.project_id => epochs.push(epoch),
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "skipping unreadable epoch record");
                    }
                }
            }
        }
        epochs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(epochs)
    }
}
