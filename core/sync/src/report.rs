//! Pass reports and per-collection outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use tidemark_client::ConflictReport;

/// Phase a collection's replication reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Not started yet.
    Idle,
    /// Reading the bulk working set.
    Querying,
    /// Walking the checkpoint cursor.
    Pulling,
    /// Point-reading a representative document.
    Verifying,
    /// Submitting the write batch.
    Pushing,
    /// Driven through every applicable step.
    Complete,
}

/// Outcome of one collection within a pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionOutcome {
    /// Collection name.
    pub collection: String,
    /// Documents in the bulk working set.
    pub queried: usize,
    /// Documents pulled through the checkpoint cursor.
    pub pulled: usize,
    /// Rows submitted to push.
    pub pushed: usize,
    /// Conflicts reported for this collection.
    pub conflicts: usize,
    /// Phase reached; `Complete` unless `error` is set.
    pub phase: Phase,
    /// Error that aborted this collection's pass, if any.
    pub error: Option<String>,
}

impl CollectionOutcome {
    pub(crate) fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            queried: 0,
            pulled: 0,
            pushed: 0,
            conflicts: 0,
            phase: Phase::Idle,
            error: None,
        }
    }

    /// Whether the collection was driven through every step.
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.phase == Phase::Complete
    }
}

/// Result of a full pass over a set of collections.
///
/// Conflicts are surfaced for inspection, never auto-resolved.
#[derive(Debug, Serialize)]
pub struct PassReport {
    /// One outcome per collection, in pass order.
    pub outcomes: Vec<CollectionOutcome>,
    /// Union of every conflict encountered during the pass.
    pub conflicts: Vec<ConflictReport>,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the pass.
    pub duration: Duration,
}

impl PassReport {
    /// Whether every collection completed.
    pub fn succeeded(&self) -> bool {
        self.outcomes.iter().all(CollectionOutcome::succeeded)
    }

    /// Total documents pulled across collections.
    pub fn documents_pulled(&self) -> usize {
        self.outcomes.iter().map(|outcome| outcome.pulled).sum()
    }
}
