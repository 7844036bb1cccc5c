//! Tidemark replication orchestration.
//!
//! This crate sequences the protocol engines into full sync passes:
//! - Per-collection state machine: query, pull, verify, push
//! - Explicit pacing policy between remote calls
//! - Explicit configuration, no ambient globals
//! - Pass reports with per-collection outcomes and the union of conflicts
//!
//! ## Key Invariants
//!
//! - Collections are processed strictly sequentially
//! - A failing collection aborts only its own pass
//! - Conflicts are surfaced to the caller, never auto-resolved
//! - Checkpoints live for one pass and are discarded at its end

pub mod config;
pub mod orchestrator;
pub mod pacing;
pub mod report;

pub use config::SyncConfig;
pub use orchestrator::{DocumentTransform, Orchestrator, PushPlan};
pub use pacing::Pacing;
pub use report::{CollectionOutcome, PassReport, Phase};
