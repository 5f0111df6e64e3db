//! Stage definitions and per-stage reports.

use crate::provider::ExtractionProvider;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a stage's relationships are treated when an endpoint is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipPolicy {
    /// Purely additive edges: a missing endpoint is downgraded to a warning
    /// and extraction continues.
    Optional,
    /// Load-bearing provenance edges: a missing endpoint fails the stage.
    ProvenanceCritical,
}

/// One named extraction stage in the dependency-ordered sequence.
pub struct Stage {
    pub name: String,
    pub provider: Box<dyn ExtractionProvider>,
    pub relationship_policy: RelationshipPolicy,
}

impl Stage {
    pub fn new(
        name: impl Into<String>,
        provider: Box<dyn ExtractionProvider>,
        relationship_policy: RelationshipPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            relationship_policy,
        }
    }
}

/// Outcome contract every stage reports back to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub success: bool,
    pub duration: Duration,
    pub entities_created: usize,
    pub relationships_created: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl StageReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            duration: Duration::ZERO,
            entities_created: 0,
            relationships_created: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn fail(&mut self, message: String) {
        self.success = false;
        self.errors.push(message);
    }
}
