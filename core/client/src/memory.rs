//! In-memory transport for testing and offline development.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use tidemark_common::{Document, DocumentKey, Result};

use crate::transport::{Method, Transport, TransportRequest, TransportResponse};

/// Transport that serves the replication endpoints from process memory.
///
/// Collections are plain vectors of documents. Bulk pages are ordered by
/// resolved key; pull pages by `updated_at` with the key as tie-break, which
/// is what a real backend with a compound index produces. All data is lost
/// on drop.
#[derive(Default)]
pub struct MemoryTransport {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    fail_next: RwLock<Option<(u16, Value)>>,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    collection: String,
    limit: u32,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    filter: Option<Value>,
    #[serde(default)]
    sort: Option<Value>,
    #[serde(default)]
    fields: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct PushRequest {
    docs: Vec<PushRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushRow {
    new_document_state: Document,
    assumed_master_state: Option<Document>,
}

impl MemoryTransport {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document, generating an `id` when it has no key.
    pub fn insert(&self, collection: &str, mut document: Document) -> Result<DocumentKey> {
        if document.key().is_err() {
            document.set("id", Value::String(Uuid::new_v4().to_string()));
        }
        let key = document.key()?;

        let mut collections = self.collections.write().unwrap();
        let documents = collections.entry(collection.to_string()).or_default();
        match documents
            .iter_mut()
            .find(|existing| existing.key().ok().as_ref() == Some(&key))
        {
            Some(existing) => *existing = document,
            None => documents.push(document),
        }
        Ok(key)
    }

    /// Current server-side copy of a document, if any.
    pub fn document(&self, collection: &str, key: &str) -> Option<Document> {
        let collections = self.collections.read().unwrap();
        collections.get(collection)?.iter().find_map(|document| {
            let resolved = document.key().ok()?;
            (resolved.as_str() == key).then(|| document.clone())
        })
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        let collections = self.collections.read().unwrap();
        collections.get(collection).map_or(0, Vec::len)
    }

    /// Whether a collection holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Force the next request to fail with the given status and body.
    pub fn fail_next_with(&self, status: u16, body: Value) {
        *self.fail_next.write().unwrap() = Some((status, body));
    }

    fn handle(&self, request: &TransportRequest) -> TransportResponse {
        if let Some((status, body)) = self.fail_next.write().unwrap().take() {
            return TransportResponse { status, body };
        }

        let segments: Vec<String> = request
            .url
            .path_segments()
            .map(|parts| {
                parts
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let names: Vec<&str> = segments.iter().map(String::as_str).collect();
        let params: HashMap<String, String> = request.url.query_pairs().into_owned().collect();

        match (request.method, names.as_slice()) {
            (Method::Get, ["objects", collection]) => self.list(collection, &params),
            (Method::Get, ["objects", collection, id]) => self.get_one(collection, id),
            (Method::Post, ["query"]) => self.query(request.body.as_ref()),
            (Method::Get, ["pull", collection]) => self.pull(collection, &params),
            (Method::Post, ["push", collection]) => self.push(collection, request.body.as_ref()),
            _ => TransportResponse {
                status: 404,
                body: json!({"error": "unknown endpoint"}),
            },
        }
    }

    fn list(&self, collection: &str, params: &HashMap<String, String>) -> TransportResponse {
        let limit = match required_usize(params, "limit") {
            Ok(limit) => limit,
            Err(response) => return response,
        };
        let offset = params
            .get("offset")
            .and_then(|raw| raw.parse::<usize>().ok())
            .unwrap_or(0);
        let with_total = params.get("total").map(String::as_str) == Some("true");
        let fields = parse_fields(params);

        let collections = self.collections.read().unwrap();
        let mut documents = collections.get(collection).cloned().unwrap_or_default();
        documents.sort_by(|a, b| key_string(a).cmp(&key_string(b)));

        let total = documents.len();
        let page: Vec<Value> = documents
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|document| project(&document, fields.as_deref()).into_value())
            .collect();

        let mut metadata = json!({
            "hasMore": offset + page.len() < total,
            "count": page.len(),
        });
        if with_total {
            metadata["total"] = json!(total);
        }

        TransportResponse::ok(json!({"items": page, "metadata": metadata}))
    }

    fn get_one(&self, collection: &str, id: &str) -> TransportResponse {
        match self.document(collection, id) {
            Some(document) => TransportResponse::ok(json!({"item": document.into_value()})),
            None => TransportResponse {
                status: 404,
                body: json!({"error": format!("no document '{}' in '{}'", id, collection)}),
            },
        }
    }

    fn query(&self, body: Option<&Value>) -> TransportResponse {
        let request: QueryRequest = match decode_body(body) {
            Ok(request) => request,
            Err(response) => return response,
        };

        let collections = self.collections.read().unwrap();
        let mut documents = collections
            .get(&request.collection)
            .cloned()
            .unwrap_or_default();

        if let Some(filter) = &request.filter {
            let predicates = match parse_filter(filter) {
                Ok(predicates) => predicates,
                Err(response) => return response,
            };
            documents.retain(|document| matches_all(document, &predicates));
        }

        match &request.sort {
            Some(sort) => {
                let keys = match parse_sort(sort) {
                    Ok(keys) => keys,
                    Err(response) => return response,
                };
                documents.sort_by(|a, b| compare_by_keys(a, b, &keys));
            }
            // Without an explicit sort, key order keeps page sequences stable.
            None => documents.sort_by(|a, b| key_string(a).cmp(&key_string(b))),
        }

        let page: Vec<Value> = documents
            .into_iter()
            .skip(request.offset as usize)
            .take(request.limit as usize)
            .map(|document| project(&document, request.fields.as_deref()).into_value())
            .collect();

        TransportResponse::ok(json!({"items": page}))
    }

    fn pull(&self, collection: &str, params: &HashMap<String, String>) -> TransportResponse {
        let min_updated_at = match params.get("minUpdatedAt").and_then(|raw| raw.parse::<i64>().ok()) {
            Some(bound) => bound,
            None => return bad_request("missing or malformed 'minUpdatedAt'"),
        };
        let limit = match required_usize(params, "limit") {
            Ok(limit) => limit,
            Err(response) => return response,
        };
        let fields = parse_fields(params);

        let collections = self.collections.read().unwrap();
        let mut newer: Vec<Document> = collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|document| {
                document
                    .updated_at()
                    .map(|updated_at| updated_at > min_updated_at)
                    .unwrap_or(false)
            })
            .collect();

        newer.sort_by(|a, b| {
            let order = a.updated_at().unwrap_or(0).cmp(&b.updated_at().unwrap_or(0));
            order.then_with(|| key_string(a).cmp(&key_string(b)))
        });

        let page: Vec<Value> = newer
            .into_iter()
            .take(limit)
            .map(|document| project(&document, fields.as_deref()).into_value())
            .collect();

        TransportResponse::ok(Value::Array(page))
    }

    fn push(&self, collection: &str, body: Option<&Value>) -> TransportResponse {
        let request: PushRequest = match decode_body(body) {
            Ok(request) => request,
            Err(response) => return response,
        };

        let mut collections = self.collections.write().unwrap();
        let documents = collections.entry(collection.to_string()).or_default();

        let mut conflicts = Vec::new();
        for row in request.docs {
            let key = match row.new_document_state.key() {
                Ok(key) => key,
                Err(e) => return bad_request(&format!("unidentifiable push row: {}", e)),
            };
            let current = documents
                .iter()
                .position(|existing| existing.key().ok().as_ref() == Some(&key));

            // Each row commits or conflicts on its own; the assumed state
            // must match the current copy exactly for the write to land.
            match (current, row.assumed_master_state) {
                (Some(index), Some(assumed)) if documents[index] == assumed => {
                    documents[index] = row.new_document_state;
                }
                (None, None) => documents.push(row.new_document_state),
                (Some(index), _) => conflicts.push(documents[index].clone().into_value()),
                // No master copy to report; echo the proposed state.
                (None, Some(_)) => conflicts.push(row.new_document_state.into_value()),
            }
        }

        TransportResponse::ok(Value::Array(conflicts))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        Ok(self.handle(&request))
    }
}

fn bad_request(message: &str) -> TransportResponse {
    TransportResponse {
        status: 400,
        body: json!({"error": message}),
    }
}

fn decode_body<T: for<'de> Deserialize<'de>>(
    body: Option<&Value>,
) -> std::result::Result<T, TransportResponse> {
    let body = body.ok_or_else(|| bad_request("missing request body"))?;
    serde_json::from_value(body.clone())
        .map_err(|e| bad_request(&format!("malformed request body: {}", e)))
}

fn required_usize(
    params: &HashMap<String, String>,
    name: &str,
) -> std::result::Result<usize, TransportResponse> {
    params
        .get(name)
        .and_then(|raw| raw.parse::<usize>().ok())
        .ok_or_else(|| bad_request(&format!("missing or malformed '{}'", name)))
}

fn parse_fields(params: &HashMap<String, String>) -> Option<Vec<String>> {
    params
        .get("fields")
        .map(|raw| raw.split(',').map(str::to_string).collect())
}

fn key_string(document: &Document) -> String {
    document
        .key()
        .map(|key| key.as_str().to_string())
        .unwrap_or_default()
}

fn project(document: &Document, fields: Option<&[String]>) -> Document {
    match fields {
        None => document.clone(),
        Some(fields) => {
            let mut projected = Document::new();
            for field in fields {
                if let Some(value) = document.get(field) {
                    projected.set(field.clone(), value.clone());
                }
            }
            projected
        }
    }
}

enum Predicate {
    Eq(String, Value),
    Ne(String, Value),
}

fn parse_filter(filter: &Value) -> std::result::Result<Vec<Predicate>, TransportResponse> {
    let entries = match filter {
        Value::Object(entries) => entries,
        _ => return Err(bad_request("filter must be an object")),
    };

    let mut predicates = Vec::with_capacity(entries.len());
    for (field, condition) in entries {
        match condition {
            Value::Object(operators) if operators.len() == 1 && operators.contains_key("$ne") => {
                predicates.push(Predicate::Ne(field.clone(), operators["$ne"].clone()));
            }
            Value::Object(_) => {
                return Err(bad_request(&format!(
                    "unsupported operator for field '{}'",
                    field
                )));
            }
            value => predicates.push(Predicate::Eq(field.clone(), value.clone())),
        }
    }
    Ok(predicates)
}

fn matches_all(document: &Document, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|predicate| match predicate {
        Predicate::Eq(field, value) => document.get(field).unwrap_or(&Value::Null) == value,
        Predicate::Ne(field, value) => document.get(field).unwrap_or(&Value::Null) != value,
    })
}

fn parse_sort(sort: &Value) -> std::result::Result<Vec<(String, bool)>, TransportResponse> {
    let entries = match sort {
        Value::Array(entries) => entries.clone(),
        Value::Object(_) => vec![sort.clone()],
        _ => return Err(bad_request("sort must be an array or object")),
    };

    let mut keys = Vec::new();
    for entry in entries {
        let object = match entry {
            Value::Object(object) => object,
            _ => return Err(bad_request("sort entries must be objects")),
        };
        for (field, direction) in object {
            match direction.as_str() {
                Some("asc") => keys.push((field, true)),
                Some("desc") => keys.push((field, false)),
                _ => {
                    return Err(bad_request(
                        "sort directions must be \"asc\" or \"desc\"",
                    ));
                }
            }
        }
    }
    Ok(keys)
}

fn compare_by_keys(a: &Document, b: &Document, keys: &[(String, bool)]) -> Ordering {
    for (field, ascending) in keys {
        let left = a.get(field).unwrap_or(&Value::Null);
        let right = b.get(field).unwrap_or(&Value::Null);
        let order = value_cmp(left, right);
        if order != Ordering::Equal {
            return if *ascending { order } else { order.reverse() };
        }
    }
    // Stable fallback so page sequences do not shuffle between requests.
    key_string(a).cmp(&key_string(b))
}

fn value_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn url(path_and_query: &str) -> Url {
        Url::parse(&format!("http://store{}", path_and_query)).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_point_get() {
        let store = MemoryTransport::new();
        store
            .insert("department", doc(json!({"id": "d1", "name": "ops", "updated_at": 1})))
            .unwrap();

        let response = store
            .send(TransportRequest::get(url("/objects/department/d1")))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body["item"]["name"], "ops");

        let missing = store
            .send(TransportRequest::get(url("/objects/department/zzz")))
            .await
            .unwrap();
        assert_eq!(missing.status, 404);
    }

    #[tokio::test]
    async fn test_insert_generates_missing_ids() {
        let store = MemoryTransport::new();
        let key = store
            .insert("department", doc(json!({"name": "anonymous", "updated_at": 1})))
            .unwrap();

        assert!(!key.as_str().is_empty());
        assert!(store.document("department", key.as_str()).is_some());
    }

    #[tokio::test]
    async fn test_list_pages_in_key_order() {
        let store = MemoryTransport::new();
        for id in ["c", "a", "b"] {
            store
                .insert("location", doc(json!({"id": id, "updated_at": 1})))
                .unwrap();
        }

        let response = store
            .send(TransportRequest::get(url(
                "/objects/location?limit=2&offset=0&total=true",
            )))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body["items"][0]["id"], "a");
        assert_eq!(response.body["items"][1]["id"], "b");
        assert_eq!(response.body["metadata"]["hasMore"], true);
        assert_eq!(response.body["metadata"]["total"], 3);

        let rest = store
            .send(TransportRequest::get(url(
                "/objects/location?limit=2&offset=2&total=false",
            )))
            .await
            .unwrap();
        assert_eq!(rest.body["items"][0]["id"], "c");
        assert_eq!(rest.body["metadata"]["hasMore"], false);
        assert!(rest.body["metadata"].get("total").is_none());
    }

    #[tokio::test]
    async fn test_pull_orders_by_timestamp_then_key() {
        let store = MemoryTransport::new();
        store.insert("formula", doc(json!({"id": "b", "updated_at": 5}))).unwrap();
        store.insert("formula", doc(json!({"id": "a", "updated_at": 5}))).unwrap();
        store.insert("formula", doc(json!({"id": "c", "updated_at": 2}))).unwrap();

        let response = store
            .send(TransportRequest::get(url("/pull/formula?minUpdatedAt=0&limit=10")))
            .await
            .unwrap();
        let items = response.body.as_array().unwrap();
        assert_eq!(items[0]["id"], "c");
        assert_eq!(items[1]["id"], "a");
        assert_eq!(items[2]["id"], "b");

        let bounded = store
            .send(TransportRequest::get(url("/pull/formula?minUpdatedAt=2&limit=10")))
            .await
            .unwrap();
        assert_eq!(bounded.body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_push_commits_and_conflicts_per_row() {
        let store = MemoryTransport::new();
        store.insert("formula", doc(json!({"id": "f1", "value": 1, "updated_at": 1}))).unwrap();

        let body = json!({"docs": [
            {
                "newDocumentState": {"id": "f1", "value": 2, "updated_at": 2},
                "assumedMasterState": {"id": "f1", "value": 1, "updated_at": 1}
            },
            {
                "newDocumentState": {"id": "f2", "value": 7, "updated_at": 2},
                "assumedMasterState": null
            }
        ]});
        let response = store
            .send(TransportRequest::post(url("/push/formula"), body))
            .await
            .unwrap();
        assert_eq!(response.body.as_array().unwrap().len(), 0);
        assert_eq!(store.document("formula", "f1").unwrap().get("value"), Some(&json!(2)));
        assert_eq!(store.len("formula"), 2);

        // Stale assumed state: rejected, server copy untouched.
        let stale = json!({"docs": [{
            "newDocumentState": {"id": "f1", "value": 99, "updated_at": 3},
            "assumedMasterState": {"id": "f1", "value": 1, "updated_at": 1}
        }]});
        let rejected = store
            .send(TransportRequest::post(url("/push/formula"), stale))
            .await
            .unwrap();
        let conflicts = rejected.body.as_array().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0]["value"], 2);
        assert_eq!(store.document("formula", "f1").unwrap().get("value"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_forced_failure_applies_once() {
        let store = MemoryTransport::new();
        store.fail_next_with(503, json!({"error": "maintenance"}));

        let failed = store
            .send(TransportRequest::get(url("/objects/location?limit=1")))
            .await
            .unwrap();
        assert_eq!(failed.status, 503);

        let recovered = store
            .send(TransportRequest::get(url("/objects/location?limit=1")))
            .await
            .unwrap();
        assert_eq!(recovered.status, 200);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_404() {
        let store = MemoryTransport::new();
        let response = store
            .send(TransportRequest::get(url("/something/else")))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
    }
}
