//! Push engine: optimistic-concurrency batched writes.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use tidemark_common::{Document, DocumentKey, Error, RemoteFailure, Result};

use crate::transport::{endpoint_url, Transport, TransportRequest};

/// A proposed write: the desired new state paired with the state the client
/// believes is currently on the server.
///
/// The server commits the new state only when the assumed state matches its
/// current copy exactly; otherwise the row is rejected as a conflict and the
/// write is not applied. Writing without locking and verifying at commit
/// time is what makes retries safe: a row that already committed conflicts
/// on resubmission instead of writing twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRow {
    /// Desired post-write state.
    pub new_document_state: Document,
    /// State assumed to be on the server, or `None` for a document the
    /// client believes does not exist remotely yet.
    pub assumed_master_state: Option<Document>,
}

impl WriteRow {
    /// Row updating an existing document.
    ///
    /// # Errors
    /// - Returns error unless both states resolve to the same key
    pub fn update(new_document_state: Document, assumed_master_state: Document) -> Result<Self> {
        let new_key = new_document_state.key()?;
        let assumed_key = assumed_master_state.key()?;
        if new_key != assumed_key {
            return Err(Error::InvalidInput(format!(
                "write row states reference different documents: '{}' vs '{}'",
                new_key, assumed_key
            )));
        }
        Ok(Self {
            new_document_state,
            assumed_master_state: Some(assumed_master_state),
        })
    }

    /// Row inserting a document the client believes is absent remotely.
    ///
    /// # Errors
    /// - Returns error if the new state has no resolvable key
    pub fn insert(new_document_state: Document) -> Result<Self> {
        new_document_state.key()?;
        Ok(Self {
            new_document_state,
            assumed_master_state: None,
        })
    }

    /// Key shared by both states of the row.
    pub fn key(&self) -> Result<DocumentKey> {
        self.new_document_state.key()
    }
}

/// A rejected write: the server's current copy disagreed with the assumed
/// state. Carries the current server-side document so the caller can derive
/// a new write from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictReport {
    /// Collection the rejected row targeted.
    pub collection: String,
    /// Current server-side state of the document.
    pub document: Document,
}

/// Engine for optimistic-concurrency batched writes.
#[derive(Clone)]
pub struct PushEngine {
    endpoint: Url,
    transport: Arc<dyn Transport>,
}

impl PushEngine {
    /// Create a push engine against `endpoint`.
    pub fn new(endpoint: Url, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }

    /// Submit a batch of writes.
    ///
    /// Every submitted row is either committed atomically or present in the
    /// returned conflicts; an empty return means the whole batch committed.
    /// Rows are evaluated independently, with no ordering guarantee across
    /// them.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] when `rows` is empty
    /// - [`Error::RemotePush`] on any non-200 response, or on a transport
    ///   failure — in which case the batch outcome is undetermined and must
    ///   not be treated as success
    /// - [`Error::Protocol`] when the remote reports a conflict for a
    ///   document that was never submitted
    pub async fn push(&self, collection: &str, rows: &[WriteRow]) -> Result<Vec<ConflictReport>> {
        if rows.is_empty() {
            return Err(Error::InvalidInput("push batch is empty".to_string()));
        }

        let mut submitted = BTreeSet::new();
        for row in rows {
            submitted.insert(row.key()?);
        }

        let url = endpoint_url(&self.endpoint, &["push", collection])?;
        let request = TransportRequest::post(url.clone(), json!({"docs": rows}));
        let response = self.transport.send(request).await.map_err(|e| {
            Error::RemotePush(RemoteFailure::no_response(collection, url.as_str(), e))
        })?;
        if !response.is_success() {
            return Err(Error::RemotePush(RemoteFailure::status(
                collection,
                url.as_str(),
                response.status,
                response.body,
            )));
        }

        let conflicting: Vec<Document> = serde_json::from_value(response.body)
            .map_err(|e| Error::Serialization(format!("malformed push response: {}", e)))?;

        let mut conflicts = Vec::with_capacity(conflicting.len());
        for document in conflicting {
            let key = document.key()?;
            if !submitted.contains(&key) {
                return Err(Error::Protocol(format!(
                    "push conflict reported for unsubmitted document '{}'",
                    key
                )));
            }
            conflicts.push(ConflictReport {
                collection: collection.to_string(),
                document,
            });
        }

        debug!(
            "pushed {} row(s) to '{}', {} conflict(s)",
            rows.len(),
            collection,
            conflicts.len()
        );
        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn engine_over(store: Arc<MemoryTransport>) -> PushEngine {
        PushEngine::new(Url::parse("http://store").unwrap(), store)
    }

    fn bumped(document: &Document) -> Document {
        let mut next = document.clone();
        let count = next.get("count").and_then(Value::as_i64).unwrap_or(0);
        next.set("count", json!(count + 1));
        next.set("updated_at", json!(document.updated_at().unwrap() + 1));
        next
    }

    #[tokio::test]
    async fn test_matching_assumed_state_commits() {
        let store = Arc::new(MemoryTransport::new());
        let current = doc(json!({"id": "r1", "count": 0, "updated_at": 10}));
        store.insert("reporting-period", current.clone()).unwrap();
        let engine = engine_over(store.clone());

        let row = WriteRow::update(bumped(&current), current).unwrap();
        let conflicts = engine.push("reporting-period", &[row]).await.unwrap();

        assert!(conflicts.is_empty());
        let committed = store.document("reporting-period", "r1").unwrap();
        assert_eq!(committed.get("count"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_stale_assumed_state_conflicts_and_leaves_server_unchanged() {
        let store = Arc::new(MemoryTransport::new());
        let current = doc(json!({"id": "r1", "count": 5, "updated_at": 50}));
        store.insert("reporting-period", current.clone()).unwrap();
        let engine = engine_over(store.clone());

        let stale = doc(json!({"id": "r1", "count": 4, "updated_at": 40}));
        let row = WriteRow::update(bumped(&current), stale).unwrap();
        let conflicts = engine.push("reporting-period", &[row]).await.unwrap();

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].collection, "reporting-period");
        assert_eq!(conflicts[0].document, current);
        assert_eq!(store.document("reporting-period", "r1").unwrap(), current);
    }

    #[tokio::test]
    async fn test_three_rows_with_one_stale_commit_the_other_two() {
        let store = Arc::new(MemoryTransport::new());
        let mut rows = Vec::new();
        for index in 0..3 {
            let current = doc(json!({
                "id": format!("d{}", index),
                "count": index,
                "updated_at": (index as i64 + 1) * 10,
            }));
            store.insert("dependency-edge", current.clone()).unwrap();
            let assumed = if index == 0 {
                doc(json!({"id": "d0", "count": 99, "updated_at": 1}))
            } else {
                current.clone()
            };
            rows.push(WriteRow {
                new_document_state: bumped(&current),
                assumed_master_state: Some(assumed),
            });
        }
        let engine = engine_over(store.clone());

        let conflicts = engine.push("dependency-edge", &rows).await.unwrap();

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].document.key().unwrap().as_str(), "d0");
        // Row 0 untouched, rows 1 and 2 committed.
        assert_eq!(
            store.document("dependency-edge", "d0").unwrap().get("count"),
            Some(&json!(0))
        );
        assert_eq!(
            store.document("dependency-edge", "d1").unwrap().get("count"),
            Some(&json!(2))
        );
        assert_eq!(
            store.document("dependency-edge", "d2").unwrap().get("count"),
            Some(&json!(3))
        );
    }

    #[tokio::test]
    async fn test_resubmitting_a_committed_batch_conflicts_every_row() {
        let store = Arc::new(MemoryTransport::new());
        let current = doc(json!({"id": "r1", "count": 0, "updated_at": 10}));
        store.insert("reporting-period", current.clone()).unwrap();
        let engine = engine_over(store.clone());

        let row = WriteRow::update(bumped(&current), current).unwrap();
        assert!(engine
            .push("reporting-period", &[row.clone()])
            .await
            .unwrap()
            .is_empty());

        // The assumed state is now stale: no duplicate write, one conflict.
        let conflicts = engine.push("reporting-period", &[row]).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            store.document("reporting-period", "r1").unwrap().get("count"),
            Some(&json!(1))
        );
    }

    #[tokio::test]
    async fn test_insert_rows_commit_when_absent() {
        let store = Arc::new(MemoryTransport::new());
        let engine = engine_over(store.clone());

        let row = WriteRow::insert(doc(json!({"id": "fresh", "updated_at": 1}))).unwrap();
        let conflicts = engine.push("department", &[row]).await.unwrap();

        assert!(conflicts.is_empty());
        assert!(store.document("department", "fresh").is_some());
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let engine = engine_over(Arc::new(MemoryTransport::new()));
        assert!(matches!(
            engine.push("department", &[]).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_mismatched_row_keys_are_rejected() {
        let result = WriteRow::update(
            doc(json!({"id": "a", "updated_at": 1})),
            doc(json!({"id": "b", "updated_at": 1})),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_reports_undetermined_push() {
        let store = Arc::new(MemoryTransport::new());
        store.insert("department", doc(json!({"id": "d", "updated_at": 1}))).unwrap();
        store.fail_next_with(500, json!({"error": "write aborted"}));
        let engine = engine_over(store);

        let current = doc(json!({"id": "d", "updated_at": 1}));
        let row = WriteRow::update(bumped(&current), current).unwrap();
        match engine.push("department", &[row]).await {
            Err(Error::RemotePush(failure)) => {
                assert_eq!(failure.status, Some(500));
                assert_eq!(failure.collection, "department");
            }
            other => panic!("expected RemotePush, got {:?}", other.is_ok()),
        }
    }

    struct CannedTransport(Value);

    #[async_trait]
    impl Transport for CannedTransport {
        async fn send(&self, _request: TransportRequest) -> Result<TransportResponse> {
            Ok(TransportResponse::ok(self.0.clone()))
        }
    }

    #[tokio::test]
    async fn test_stray_conflict_keys_are_a_protocol_violation() {
        let canned = Arc::new(CannedTransport(json!([
            {"id": "never-submitted", "updated_at": 1}
        ])));
        let engine = PushEngine::new(Url::parse("http://store").unwrap(), canned);

        let current = doc(json!({"id": "d", "updated_at": 1}));
        let row = WriteRow::update(current.clone(), current).unwrap();
        let result = engine.push("department", &[row]).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
