//! The transport seam: how requests reach the backend.
//!
//! The client speaks to the server through the [`Transport`] trait, a single
//! async call taking a verb, a resource path, query params, and an optional
//! JSON body. Implementations return `Err` both for network failures and for
//! non-2xx responses, so everything above the trait sees one error shape.
//!
//! [`HttpTransport`] is the built-in reqwest-backed implementation (behind
//! the `http` feature, on by default). Tests and embedders with their own
//! HTTP stack can provide any other implementation; retries, backpressure,
//! and request deduplication belong in that layer, not in this crate.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// HTTP verbs used against a JSON:API backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// One request handed to a [`Transport`].
///
/// `path` is relative to the backend root and always starts with `/`,
/// following the `/<type>` and `/<type>/<id>` resource-path convention.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl TransportRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A successful (2xx) response with its JSON-decoded body.
///
/// An empty body (e.g. `204 No Content` on delete) decodes to `Value::Null`.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

/// Pluggable request execution.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse>;
}

#[cfg(feature = "http")]
pub use self::http::{HttpTransport, TransportConfig};

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tracing::debug;
    use url::Url;

    use super::{Method, Transport, TransportRequest, TransportResponse};
    use crate::error::{Error, Result};

    /// Configuration for the built-in reqwest transport.
    #[derive(Clone, Debug)]
    pub struct TransportConfig {
        /// Whole-request timeout in milliseconds.
        pub request_timeout_ms: u64,
        /// Idle connections kept per host.
        pub pool_max_idle_per_host: usize,
    }

    impl Default for TransportConfig {
        fn default() -> Self {
            Self {
                request_timeout_ms: 30_000,
                pool_max_idle_per_host: 8,
            }
        }
    }

    /// reqwest-backed [`Transport`] for a single backend base URL.
    #[derive(Clone, Debug)]
    pub struct HttpTransport {
        client: reqwest::Client,
        base_url: String,
    }

    impl HttpTransport {
        pub fn new(base_url: &str) -> Result<Self> {
            Self::with_config(base_url, TransportConfig::default())
        }

        pub fn with_config(base_url: &str, config: TransportConfig) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_millis(config.request_timeout_ms))
                .pool_max_idle_per_host(config.pool_max_idle_per_host)
                .build()
                .map_err(Error::transport)?;
            Self::with_client(client, base_url)
        }

        /// Wrap an existing reqwest client (shared pools, custom middleware).
        pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self> {
            // Validate early; requests only append resource paths.
            Url::parse(base_url)?;
            Ok(Self {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
            })
        }
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn request(&self, request: TransportRequest) -> Result<TransportResponse> {
            let url = Url::parse(&format!("{}{}", self.base_url, request.path))?;
            let method = match request.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Patch => reqwest::Method::PATCH,
                Method::Delete => reqwest::Method::DELETE,
            };
            debug!(method = request.method.as_str(), url = %url, "dispatching request");

            let mut builder = self.client.request(method, url);
            if !request.params.is_empty() {
                builder = builder.query(&request.params);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(Error::transport)?;
            let status = response.status().as_u16();
            let bytes = response.bytes().await.map_err(Error::transport)?;
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                // Error pages are not always JSON; fall back to null rather
                // than masking the status-derived error below.
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };

            if !(200..300).contains(&status) {
                return Err(Error::request(Some(status), Some(&body)));
            }
            Ok(TransportResponse { status, body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_sets_params_and_body() {
        let request = TransportRequest::new(Method::Post, "/posts")
            .with_params(vec![("include".into(), "author".into())])
            .with_body(serde_json::json!({"data": {"type": "post"}}));
        assert_eq!(request.method.as_str(), "POST");
        assert_eq!(request.path, "/posts");
        assert_eq!(request.params.len(), 1);
        assert!(request.body.is_some());
    }

    #[cfg(feature = "http")]
    #[test]
    fn http_transport_rejects_invalid_base_url() {
        assert!(HttpTransport::new("not a url").is_err());
        assert!(HttpTransport::new("https://api.example.com/v1/").is_ok());
    }
}
