//! Pull engine: checkpoint-cursor incremental reads.

use std::sync::Arc;
use tracing::debug;
use url::Url;

use tidemark_common::{Checkpoint, Document, Error, RemoteFailure, Result};

use crate::transport::{endpoint_url, Transport, TransportRequest};

/// One page returned by [`PullEngine::pull`].
#[derive(Debug, Clone)]
pub struct PullPage {
    /// Documents newer than the checkpoint, ascending by `updated_at`,
    /// already stripped of boundary documents the checkpoint has seen.
    pub documents: Vec<Document>,
    /// True when this page exhausted the window behind the checkpoint.
    /// A full page means more data may remain at or after the last
    /// timestamp, and the caller must pull again with an advanced cursor.
    pub reached_end: bool,
}

/// Engine for incremental reads bounded by a caller-owned checkpoint.
///
/// The engine reports failures and never retries; retry policy belongs to
/// the caller.
#[derive(Clone)]
pub struct PullEngine {
    endpoint: Url,
    transport: Arc<dyn Transport>,
}

impl PullEngine {
    /// Create a pull engine against `endpoint`.
    pub fn new(endpoint: Url, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }

    /// Fetch the next window of documents modified after `checkpoint`.
    ///
    /// When the checkpoint tracks keys at its boundary timestamp, the
    /// request re-fetches the boundary with a widened limit and drops the
    /// documents already synchronized, so siblings sharing the boundary
    /// timestamp are never skipped. At most `limit` documents are returned.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] when `limit` is zero
    /// - [`Error::RemotePull`] on any non-200 response or transport failure
    /// - [`Error::Protocol`] when the response violates ordering or bound
    pub async fn pull(
        &self,
        collection: &str,
        checkpoint: &Checkpoint,
        limit: u32,
        fields: Option<&[String]>,
    ) -> Result<PullPage> {
        if limit == 0 {
            return Err(Error::InvalidInput("limit must be positive".to_string()));
        }

        let bound = checkpoint.request_bound();
        let requested = limit as usize + checkpoint.refetch_overhead();
        let mut url = endpoint_url(&self.endpoint, &["pull", collection])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("minUpdatedAt", &bound.to_string())
                .append_pair("limit", &requested.to_string());
            if let Some(fields) = fields {
                pairs.append_pair("fields", &fields.join(","));
            }
        }

        let response = self
            .transport
            .send(TransportRequest::get(url.clone()))
            .await
            .map_err(|e| {
                Error::RemotePull(RemoteFailure::no_response(collection, url.as_str(), e))
            })?;
        if !response.is_success() {
            return Err(Error::RemotePull(RemoteFailure::status(
                collection,
                url.as_str(),
                response.status,
                response.body,
            )));
        }

        let raw: Vec<Document> = serde_json::from_value(response.body)
            .map_err(|e| Error::Serialization(format!("malformed pull response: {}", e)))?;

        // Remote contract: strictly newer than the bound, ascending.
        let mut previous: Option<i64> = None;
        for document in &raw {
            let updated_at = document.updated_at()?;
            if updated_at <= bound {
                return Err(Error::Protocol(format!(
                    "pull returned a document at {} not after bound {}",
                    updated_at, bound
                )));
            }
            if let Some(previous) = previous {
                if updated_at < previous {
                    return Err(Error::Protocol(
                        "pull page is not ordered by updated_at".to_string(),
                    ));
                }
            }
            previous = Some(updated_at);
        }

        let raw_count = raw.len();
        let mut documents = Vec::with_capacity(raw_count);
        for document in raw {
            if checkpoint.contains(&document)? {
                continue;
            }
            documents.push(document);
        }

        let truncated = documents.len() > limit as usize;
        if truncated {
            documents.truncate(limit as usize);
        }

        debug!(
            "pulled {} document(s) from '{}' after {}",
            documents.len(),
            collection,
            bound
        );

        Ok(PullPage {
            documents,
            reached_end: raw_count < requested && !truncated,
        })
    }
}
