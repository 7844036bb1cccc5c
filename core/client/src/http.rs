//! HTTP transport backed by reqwest.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use tidemark_common::{Error, Result};

use crate::transport::{Method, Transport, TransportRequest, TransportResponse};

/// Transport that sends requests over HTTP with a shared connection pool.
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    /// Create a transport with the given per-request timeout.
    ///
    /// # Errors
    /// - Returns error if the underlying HTTP client cannot be constructed
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("Tidemark/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut builder = match request.method {
            Method::Get => self.http.get(request.url.clone()),
            Method::Post => self.http.post(request.url.clone()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!("{} {}", request.method, request.url);

        let response = builder.send().await.map_err(|e| {
            Error::Transport(format!("{} {}: {}", request.method, request.url, e))
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response body: {}", e)))?;

        // Error bodies are not always JSON; keep the raw text for diagnosis.
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(TransportResponse { status, body })
    }
}
