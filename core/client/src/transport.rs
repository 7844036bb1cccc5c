//! Transport contract consumed by the protocol engines.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use url::Url;

use tidemark_common::{Error, Result};

/// HTTP method subset the replication protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single request handed to the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl TransportRequest {
    /// A body-less GET request.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// A POST request carrying a JSON body.
    pub fn post(url: Url, body: Value) -> Self {
        Self {
            method: Method::Post,
            url,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(body),
        }
    }
}

/// Status code plus decoded body.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

impl TransportResponse {
    /// A 200 response with the given body.
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// Whether the remote accepted the request.
    ///
    /// Anything other than 200 is a protocol-level failure on every endpoint.
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Sends an HTTP-like request and returns the status plus decoded body.
///
/// This is the only seam between the engines and the network. The engines
/// never inspect response headers; the status code and body are the whole
/// contract. Implementations own connection handling, TLS, and any
/// socket-level retry policy.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request.
    ///
    /// # Errors
    /// - [`Error::Transport`] when no response could be obtained
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Build an endpoint URL from the base plus path segments.
///
/// Segments are percent-encoded by the URL library, so collection names and
/// document keys cannot break out of the path.
pub(crate) fn endpoint_url(endpoint: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = endpoint.clone();
    {
        let mut parts = url.path_segments_mut().map_err(|_| {
            Error::InvalidInput(format!("endpoint '{}' cannot be a base URL", endpoint))
        })?;
        parts.pop_if_empty().extend(segments);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_names() {
        assert_eq!(Method::Get.as_str(), "GET");
        assert_eq!(Method::Post.as_str(), "POST");
    }

    #[test]
    fn test_post_requests_carry_content_type() {
        let url = Url::parse("http://remote/query").unwrap();
        let request = TransportRequest::post(url, json!({"collection": "formula"}));

        assert_eq!(request.method, Method::Post);
        assert!(request
            .headers
            .iter()
            .any(|(name, value)| name == "content-type" && value == "application/json"));
        assert!(request.body.is_some());
    }

    #[test]
    fn test_only_200_is_success() {
        assert!(TransportResponse::ok(Value::Null).is_success());
        for status in [201, 204, 301, 404, 500] {
            let response = TransportResponse {
                status,
                body: Value::Null,
            };
            assert!(!response.is_success());
        }
    }

    #[test]
    fn test_endpoint_url_joins_segments() {
        let base = Url::parse("http://remote:8080/api").unwrap();
        let url = endpoint_url(&base, &["objects", "plan-line"]).unwrap();
        assert_eq!(url.as_str(), "http://remote:8080/api/objects/plan-line");
    }

    #[test]
    fn test_endpoint_url_handles_trailing_slash() {
        let base = Url::parse("http://remote/api/").unwrap();
        let url = endpoint_url(&base, &["pull", "formula"]).unwrap();
        assert_eq!(url.as_str(), "http://remote/api/pull/formula");
    }

    #[test]
    fn test_endpoint_url_escapes_segments() {
        let base = Url::parse("http://remote").unwrap();
        let url = endpoint_url(&base, &["objects", "a b/c"]).unwrap();
        assert_eq!(url.as_str(), "http://remote/objects/a%20b%2Fc");
    }
}
