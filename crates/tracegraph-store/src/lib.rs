//! TraceGraph Primary Store Layer
//!
//! Owns the relational side of the dual-store engine:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      PRIMARY STORE LAYER                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌───────────┐      ┌───────────────┐      ┌─────────────────┐   │
//! │  │ Candidate │─────►│ UpsertService │─────►│ PrimaryStore    │   │
//! │  │ records   │      │ (resolve,     │      │ (conflict-keyed │   │
//! │  └───────────┘      │  hash,        │      │  tables)        │   │
//! │                     │  classify)    │      └─────────────────┘   │
//! │                     └──────┬────────┘                            │
//! │                            │ CREATE/UPDATE only                  │
//! │                            ▼                                     │
//! │                     ┌──────────────┐      ┌─────────────────┐    │
//! │                     │ ShadowLedger │◄─────│ EpochService    │    │
//! │                     │ (append-only │      │ (one run,       │    │
//! │                     │  JSONL)      │      │  derived counts)│    │
//! │                     └──────────────┘      └─────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Write ordering is load-bearing: the ledger line for a record is appended
//! strictly after the store write succeeds, and never on a NO-OP. Re-running
//! extraction over unchanged sources therefore leaves the ledger tail
//! byte-identical, which is the engine's replay guarantee.

pub mod epoch;
pub mod ledger;
pub mod primary;
pub mod upsert;

pub use epoch::{EpochService, RunProvenance};
pub use ledger::ShadowLedger;
pub use primary::{PrimaryStore, StoreConfig};
pub use upsert::{BatchReport, UpsertService};
