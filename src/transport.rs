//! Injectable request/response transport.
//!
//! The stream issues every request through a [`Transport`] function so
//! tests and embedders can substitute the network layer. The default
//! transport wraps a pooled [`reqwest::Client`].
//!
//! Cancellation is cooperative: the fetch loop races the transport future
//! against its abort/pause signals and drops it to cancel — dropping the
//! reqwest future aborts the underlying request.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, ShapeLinkError};

/// An outbound shape request. GET semantics; the query string is already
/// encoded into `url`.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// A transport-level response. Header names are lower-cased.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl TransportResponse {
    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header lookup by lower-cased name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Injectable transport: one outbound request, one response.
pub type Transport =
    Arc<dyn Fn(TransportRequest) -> BoxFuture<'static, Result<TransportResponse>> + Send + Sync>;

/// Build the default transport over a pooled reqwest client.
///
/// No overall request timeout is set: live requests are long polls held
/// open by the server. Connection pooling keeps the catch-up phase from
/// re-handshaking between back-to-back requests.
pub fn default_transport() -> Result<Transport> {
    let client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .build()
        .map_err(|e| ShapeLinkError::ConfigurationError(e.to_string()))?;
    Ok(transport_from_client(client))
}

/// Wrap an existing reqwest client as a [`Transport`].
pub fn transport_from_client(client: reqwest::Client) -> Transport {
    Arc::new(move |request: TransportRequest| {
        let client = client.clone();
        Box::pin(async move {
            let mut builder = client.get(&request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
                })
                .collect();
            let body = response.text().await?;

            Ok(TransportResponse {
                status,
                headers,
                body,
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_statuses() {
        let mut resp = TransportResponse {
            status: 200,
            headers: HashMap::new(),
            body: String::new(),
        };
        assert!(resp.is_success());
        resp.status = 204;
        assert!(resp.is_success());
        resp.status = 401;
        assert!(!resp.is_success());
    }

    #[test]
    fn test_header_lookup() {
        let mut headers = HashMap::new();
        headers.insert("shape-offset".to_string(), "0_0".to_string());
        let resp = TransportResponse {
            status: 200,
            headers,
            body: String::new(),
        };
        assert_eq!(resp.header("shape-offset"), Some("0_0"));
        assert_eq!(resp.header("shape-handle"), None);
    }
}
