//! Replication orchestrator: sequences query, pull and push per collection.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use tidemark_client::{
    ConflictReport, PullEngine, PushEngine, QueryEngine, Transport, WriteRow,
};
use tidemark_common::{Checkpoint, Document, Result, UPDATED_AT_FIELD};

use crate::config::SyncConfig;
use crate::pacing::Pacing;
use crate::report::{CollectionOutcome, PassReport, Phase};

/// Caller-supplied derivation of the desired post-write state.
///
/// The transform must preserve the document key; a row whose states resolve
/// to different keys is rejected before any network call.
pub type DocumentTransform = Arc<dyn Fn(&Document) -> Document + Send + Sync>;

/// How a pass builds its push batches.
#[derive(Clone)]
pub struct PushPlan {
    transform: DocumentTransform,
    conflict_probe: bool,
}

impl PushPlan {
    /// Push every pulled document through `transform`, pairing the result
    /// with the document's state as fetched.
    pub fn new(transform: impl Fn(&Document) -> Document + Send + Sync + 'static) -> Self {
        Self {
            transform: Arc::new(transform),
            conflict_probe: false,
        }
    }

    /// Deliberately mark the first row's assumed state stale, so the remote
    /// reports exactly that row as a conflict. Exercises the conflict path
    /// end to end against a live system.
    pub fn with_conflict_probe(mut self) -> Self {
        self.conflict_probe = true;
        self
    }
}

/// Drives the replication protocols against one remote store.
///
/// Collections are processed strictly sequentially, and the pacing policy is
/// awaited between consecutive remote calls, so the remote sees a bounded,
/// predictable request rate. Checkpoints and pagination offsets are created
/// at the start of a pass and discarded at its end; nothing persists across
/// passes.
pub struct Orchestrator {
    config: SyncConfig,
    pacing: Pacing,
    query: QueryEngine,
    pull: PullEngine,
    push: PushEngine,
}

impl Orchestrator {
    /// Create an orchestrator talking through `transport`.
    pub fn new(config: SyncConfig, transport: Arc<dyn Transport>, pacing: Pacing) -> Self {
        let endpoint = config.endpoint.clone();
        Self {
            query: QueryEngine::new(endpoint.clone(), transport.clone()),
            pull: PullEngine::new(endpoint.clone(), transport.clone()),
            push: PushEngine::new(endpoint, transport),
            config,
            pacing,
        }
    }

    /// Run one pass over `collections`.
    ///
    /// Every collection is driven through query, pull and (when `plan` is
    /// given) push exactly once. A failing collection aborts only its own
    /// pass: the outcome records where it stopped and the pass continues
    /// with the next collection. The returned report carries the union of
    /// all conflicts for the caller to inspect.
    pub async fn run_pass(&self, collections: &[String], plan: Option<&PushPlan>) -> PassReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut outcomes = Vec::with_capacity(collections.len());
        let mut conflicts = Vec::new();

        info!("starting sync pass over {} collection(s)", collections.len());

        for collection in collections {
            let mut outcome = CollectionOutcome::new(collection);
            match self.sync_collection(collection, plan, &mut outcome).await {
                Ok(mut found) => {
                    outcome.phase = Phase::Complete;
                    outcome.conflicts = found.len();
                    conflicts.append(&mut found);
                }
                Err(e) => {
                    error!(
                        "collection '{}' aborted during {:?}: {}",
                        collection, outcome.phase, e
                    );
                    outcome.error = Some(e.to_string());
                }
            }
            outcomes.push(outcome);
        }

        let report = PassReport {
            outcomes,
            conflicts,
            started_at,
            duration: start.elapsed(),
        };
        info!(
            "sync pass finished in {:?}: {} document(s) pulled, {} conflict(s)",
            report.duration,
            report.documents_pulled(),
            report.conflicts.len()
        );
        report
    }

    async fn sync_collection(
        &self,
        collection: &str,
        plan: Option<&PushPlan>,
        outcome: &mut CollectionOutcome,
    ) -> Result<Vec<ConflictReport>> {
        // Bulk working set in key order.
        outcome.phase = Phase::Querying;
        let working_set = self.fetch_working_set(collection).await?;
        outcome.queried = working_set.len();

        // Incremental window from a fresh origin checkpoint.
        outcome.phase = Phase::Pulling;
        self.pacing.pause().await;
        let pulled = self.pull_collection(collection).await?;
        outcome.pulled = pulled.len();

        // Representative point read, for verification only; a failure here
        // is logged and the pass continues.
        outcome.phase = Phase::Verifying;
        self.verify_representative(collection, &pulled).await;

        let mut conflicts = Vec::new();
        if let Some(plan) = plan {
            outcome.phase = Phase::Pushing;
            if pulled.is_empty() {
                debug!("nothing to push for '{}'", collection);
            } else {
                self.pacing.pause().await;
                let rows = build_rows(&pulled, plan)?;
                outcome.pushed = rows.len();
                conflicts = self.push.push(collection, &rows).await?;
            }
        }
        Ok(conflicts)
    }

    async fn fetch_working_set(&self, collection: &str) -> Result<Vec<Document>> {
        let mut items = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = self
                .query
                .list(
                    collection,
                    self.config.page_limit,
                    offset,
                    self.config.fields.as_deref(),
                    self.config.include_total,
                )
                .await?;
            offset += page.count as u64;
            let done = !page.has_more || page.count == 0;
            items.extend(page.items);
            if done {
                break;
            }
            self.pacing.pause().await;
        }
        debug!("working set for '{}': {} document(s)", collection, items.len());
        Ok(items)
    }

    async fn pull_collection(&self, collection: &str) -> Result<Vec<Document>> {
        let mut checkpoint = Checkpoint::origin();
        let mut documents = Vec::new();
        loop {
            let page = self
                .pull
                .pull(
                    collection,
                    &checkpoint,
                    self.config.pull_batch_size,
                    self.config.fields.as_deref(),
                )
                .await?;
            checkpoint.advance(&page.documents)?;
            let done = page.reached_end;
            documents.extend(page.documents);
            if done {
                break;
            }
            self.pacing.pause().await;
        }
        Ok(documents)
    }

    async fn verify_representative(&self, collection: &str, pulled: &[Document]) {
        let id = pulled
            .first()
            .and_then(|document| document.key().ok())
            .map(|key| key.as_str().to_string())
            .or_else(|| self.config.default_scenario_id.clone());
        let id = match id {
            Some(id) => id,
            None => {
                debug!("no representative document to verify for '{}'", collection);
                return;
            }
        };

        self.pacing.pause().await;
        match self.query.get(collection, &id).await {
            Ok(document) => debug!(
                "verified '{}' in '{}' ({} field(s))",
                id,
                collection,
                document.fields().len()
            ),
            Err(e) => warn!("point read of '{}' in '{}' failed: {}", id, collection, e),
        }
    }
}

fn build_rows(documents: &[Document], plan: &PushPlan) -> Result<Vec<WriteRow>> {
    let mut rows = Vec::with_capacity(documents.len());
    for (index, document) in documents.iter().enumerate() {
        let new_state = (plan.transform)(document);
        let assumed = if plan.conflict_probe && index == 0 {
            stale_copy(document)
        } else {
            document.clone()
        };
        rows.push(WriteRow::update(new_state, assumed)?);
    }
    Ok(rows)
}

/// An assumed state the server cannot currently hold: the fetched document
/// with its timestamp rewound.
fn stale_copy(document: &Document) -> Document {
    let mut stale = document.clone();
    stale.set(UPDATED_AT_FIELD, json!(0));
    stale
}
