//! Common error types for Tidemark.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Context captured from a failed remote call.
#[derive(Debug, Clone)]
pub struct RemoteFailure {
    /// Collection the operation addressed.
    pub collection: String,
    /// Full request URL.
    pub url: String,
    /// HTTP status, or `None` when no response arrived.
    pub status: Option<u16>,
    /// Decoded response body, or the transport error message.
    pub body: Value,
}

impl RemoteFailure {
    /// Failure from a non-success status response.
    pub fn status(
        collection: impl Into<String>,
        url: impl Into<String>,
        status: u16,
        body: Value,
    ) -> Self {
        Self {
            collection: collection.into(),
            url: url.into(),
            status: Some(status),
            body,
        }
    }

    /// Failure where the request produced no response at all.
    ///
    /// The outcome of the remote operation is undetermined in this case.
    pub fn no_response(
        collection: impl Into<String>,
        url: impl Into<String>,
        detail: impl fmt::Display,
    ) -> Self {
        Self {
            collection: collection.into(),
            url: url.into(),
            status: None,
            body: Value::String(detail.to_string()),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(
                f,
                "'{}' at {}: HTTP {}: {}",
                self.collection, self.url, status, self.body
            ),
            None => write!(
                f,
                "'{}' at {}: no response: {}",
                self.collection, self.url, self.body
            ),
        }
    }
}

/// Top-level error type for Tidemark operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Paginated query rejected by the remote.
    #[error("remote query failed for {0}")]
    RemoteQuery(RemoteFailure),

    /// Checkpoint pull rejected by the remote.
    #[error("remote pull failed for {0}")]
    RemotePull(RemoteFailure),

    /// Push batch rejected, or left in an undetermined state.
    #[error("remote push failed for {0}")]
    RemotePush(RemoteFailure),

    /// Point read rejected by the remote.
    #[error("remote get failed for {0}")]
    RemoteGet(RemoteFailure),

    /// Transport-level failure before any protocol interpretation.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote answered successfully but violated a protocol invariant.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A document is missing a required field or carries a malformed one.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
