//! TraceGraph Store Synchronization
//!
//! Keeps the secondary graph store a faithful projection of the primary
//! store, and detects when it is not:
//!
//! ```text
//! ┌───────────────┐   merge / replace    ┌───────────────┐
//! │ PrimaryStore  │─────────────────────►│  GraphStore   │
//! │ (of record)   │                      │ (projection)  │
//! └──────┬────────┘                      └──────┬────────┘
//!        │                                      │
//!        └───────────► Reconciler ◄─────────────┘
//!              (counts, id sets, sampled types)
//! ```
//!
//! There is no cross-store transaction; the synchronizer relies on ordering
//! (entities before relationships) and on reconciliation catching anything
//! that slipped through. Drift is reported, never silently repaired.

pub mod reconcile;
pub mod sync;

pub use reconcile::{
    CountMismatch, IdSetDiff, ReconciliationReport, Reconciler, RecordKind, TypeMismatch,
};
pub use sync::{GraphSynchronizer, SyncReport};
