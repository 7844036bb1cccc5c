//! Query engine: offset/limit paginated reads with server-side filter and sort.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use tidemark_common::{Document, Error, RemoteFailure, Result};

use crate::transport::{endpoint_url, Transport, TransportRequest};

/// Direction for a single sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// Ordered list of sort keys, applied left to right.
#[derive(Debug, Clone, Default)]
pub struct Sort(Vec<(String, SortOrder)>);

impl Sort {
    /// No ordering requested; the remote falls back to key order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort ascending by a single field.
    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new().by(field, SortOrder::Ascending)
    }

    /// Append a sort key.
    pub fn by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.0.push((field.into(), order));
        self
    }

    /// Whether any sort key was requested.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn to_wire(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|(field, order)| {
                    let mut entry = Map::new();
                    entry.insert(field.clone(), json!(order.as_str()));
                    Value::Object(entry)
                })
                .collect(),
        )
    }
}

/// Comparison applied by a single filter predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
}

/// Conjunction of field predicates evaluated server-side.
#[derive(Debug, Clone, Default)]
pub struct Filter(Vec<(String, Comparison, Value)>);

impl Filter {
    /// An empty filter matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a field to equal a value.
    pub fn eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.0.push((field.into(), Comparison::Eq, value));
        self
    }

    /// Require a field to differ from a value.
    pub fn ne(mut self, field: impl Into<String>, value: Value) -> Self {
        self.0.push((field.into(), Comparison::Ne, value));
        self
    }

    /// Whether any predicate was added.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn to_wire(&self) -> Value {
        let mut wire = Map::new();
        for (field, comparison, value) in &self.0 {
            let condition = match comparison {
                Comparison::Eq => value.clone(),
                Comparison::Ne => json!({"$ne": value}),
            };
            wire.insert(field.clone(), condition);
        }
        Value::Object(wire)
    }
}

/// One page of a paginated read.
#[derive(Debug, Clone)]
pub struct PageResult {
    /// Documents in the requested order.
    pub items: Vec<Document>,
    /// Whether another page may exist past this one.
    pub has_more: bool,
    /// Number of documents in this page.
    pub count: usize,
    /// Collection total, when the remote reported one.
    pub total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListBody {
    items: Vec<Document>,
    metadata: ListMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMetadata {
    has_more: bool,
    count: usize,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    items: Vec<Document>,
}

#[derive(Debug, Deserialize)]
struct GetBody {
    item: Document,
}

/// Engine for offset/limit reads against the remote store.
///
/// The engine reports failures and never retries; retry policy belongs to
/// the caller.
#[derive(Clone)]
pub struct QueryEngine {
    endpoint: Url,
    transport: Arc<dyn Transport>,
}

impl QueryEngine {
    /// Create a query engine against `endpoint`.
    pub fn new(endpoint: Url, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }

    /// Filtered, sorted, projected page read.
    ///
    /// For a fixed filter and sort over unchanged server state, increasing
    /// `offset` walks a stable page sequence.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] when `limit` is zero
    /// - [`Error::RemoteQuery`] on any non-200 response or transport failure
    pub async fn query(
        &self,
        collection: &str,
        limit: u32,
        offset: u64,
        filter: &Filter,
        sort: &Sort,
        fields: Option<&[String]>,
    ) -> Result<PageResult> {
        check_limit(limit)?;
        let url = endpoint_url(&self.endpoint, &["query"])?;

        let mut body = Map::new();
        body.insert("collection".to_string(), json!(collection));
        body.insert("limit".to_string(), json!(limit));
        body.insert("offset".to_string(), json!(offset));
        if !filter.is_empty() {
            body.insert("filter".to_string(), filter.to_wire());
        }
        if !sort.is_empty() {
            body.insert("sort".to_string(), sort.to_wire());
        }
        if let Some(fields) = fields {
            body.insert("fields".to_string(), json!(fields));
        }

        let request = TransportRequest::post(url.clone(), Value::Object(body));
        let response = self.transport.send(request).await.map_err(|e| {
            Error::RemoteQuery(RemoteFailure::no_response(collection, url.as_str(), e))
        })?;
        if !response.is_success() {
            return Err(Error::RemoteQuery(RemoteFailure::status(
                collection,
                url.as_str(),
                response.status,
                response.body,
            )));
        }

        let parsed: QueryBody = serde_json::from_value(response.body)
            .map_err(|e| Error::Serialization(format!("malformed query response: {}", e)))?;
        let count = parsed.items.len();
        debug!("queried {} document(s) from '{}'", count, collection);

        Ok(PageResult {
            has_more: count as u32 == limit,
            count,
            items: parsed.items,
            total: None,
        })
    }

    /// Bulk page read in collection key order.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] when `limit` is zero
    /// - [`Error::RemoteQuery`] on any non-200 response or transport failure
    pub async fn list(
        &self,
        collection: &str,
        limit: u32,
        offset: u64,
        fields: Option<&[String]>,
        total: bool,
    ) -> Result<PageResult> {
        check_limit(limit)?;
        let mut url = endpoint_url(&self.endpoint, &["objects", collection])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("limit", &limit.to_string())
                .append_pair("offset", &offset.to_string());
            if let Some(fields) = fields {
                pairs.append_pair("fields", &fields.join(","));
            }
            pairs.append_pair("total", if total { "true" } else { "false" });
        }

        let response = self
            .transport
            .send(TransportRequest::get(url.clone()))
            .await
            .map_err(|e| {
                Error::RemoteQuery(RemoteFailure::no_response(collection, url.as_str(), e))
            })?;
        if !response.is_success() {
            return Err(Error::RemoteQuery(RemoteFailure::status(
                collection,
                url.as_str(),
                response.status,
                response.body,
            )));
        }

        let parsed: ListBody = serde_json::from_value(response.body)
            .map_err(|e| Error::Serialization(format!("malformed list response: {}", e)))?;
        debug!(
            "listed {} document(s) from '{}' at offset {}",
            parsed.metadata.count, collection, offset
        );

        Ok(PageResult {
            items: parsed.items,
            has_more: parsed.metadata.has_more,
            count: parsed.metadata.count,
            total: parsed.metadata.total,
        })
    }

    /// Point read of one document by key.
    ///
    /// # Errors
    /// - [`Error::RemoteGet`] on any non-200 response or transport failure
    pub async fn get(&self, collection: &str, id: &str) -> Result<Document> {
        let url = endpoint_url(&self.endpoint, &["objects", collection, id])?;

        let response = self
            .transport
            .send(TransportRequest::get(url.clone()))
            .await
            .map_err(|e| {
                Error::RemoteGet(RemoteFailure::no_response(collection, url.as_str(), e))
            })?;
        if !response.is_success() {
            return Err(Error::RemoteGet(RemoteFailure::status(
                collection,
                url.as_str(),
                response.status,
                response.body,
            )));
        }

        let parsed: GetBody = serde_json::from_value(response.body)
            .map_err(|e| Error::Serialization(format!("malformed get response: {}", e)))?;
        Ok(parsed.item)
    }
}

fn check_limit(limit: u32) -> Result<()> {
    if limit == 0 {
        return Err(Error::InvalidInput("limit must be positive".to_string()));
    }
    Ok(())
}
