//! TraceGraph Pipeline Orchestration
//!
//! Sequences extraction providers and the store services through an ordered
//! set of stages:
//!
//! ```text
//! start epoch ── DECISION "pipeline started"
//!      │
//!      ▼
//! [extraction stages]──► UpsertService ──► PrimaryStore + ShadowLedger
//!      │
//!      ▼
//! [secondary sync]─────► GraphStore
//!      │
//!      ▼
//! [validation]─────────► Reconciler
//!      │
//!      ▼
//! complete epoch ── DECISION "pipeline completed"
//! ```
//!
//! Orchestrator policy (structured error kinds, no message sniffing):
//! - a Transient failure is retried exactly once, and both the retry and its
//!   outcome are recorded as warnings;
//! - a Referential failure is a warning in stages whose relationships are
//!   optional, fatal in provenance-critical stages;
//! - `fail_fast` decides whether the first fatal stage aborts the rest;
//! - exactly one epoch brackets the run, failed on any uncaught error.

pub mod orchestrator;
pub mod provider;
pub mod stage;

pub use orchestrator::{Pipeline, PipelineConfig, PipelineReport};
pub use provider::{Extraction, ExtractionContext, ExtractionProvider, FilesystemInventoryProvider};
pub use stage::{RelationshipPolicy, Stage, StageReport};
