//! Outbound request construction.
//!
//! One request per fetch cycle. All literal-or-resolver params and headers
//! are resolved fresh here, immediately before the request is issued, then
//! the protocol's own query parameters are appended for the current
//! position.

use std::collections::HashMap;

use crate::dynamic::DynamicValue;
use crate::error::{Result, ShapeLinkError};
use crate::models::{Offset, Replica};
use crate::transport::TransportRequest;

/// The stream position a request is built for.
#[derive(Debug, Clone)]
pub(crate) struct RequestPosition {
    pub offset: Offset,
    pub handle: Option<String>,
    /// Live cursor from the previous long-poll response.
    pub cursor: Option<String>,
    /// Long poll: set only once the shape has reached up-to-date.
    pub live: bool,
}

/// Resolve params/headers and build the concrete outbound request.
///
/// Params are appended in sorted name order so identical configurations
/// produce identical URLs.
pub(crate) async fn build_request(
    url: &str,
    params: &HashMap<String, DynamicValue>,
    headers: &HashMap<String, DynamicValue>,
    replica: Replica,
    position: &RequestPosition,
) -> Result<TransportRequest> {
    let mut parsed = reqwest::Url::parse(url)
        .map_err(|e| ShapeLinkError::ConfigurationError(format!("Invalid url '{}': {}", url, e)))?;

    let mut resolved_params = Vec::with_capacity(params.len());
    for (name, value) in params {
        resolved_params.push((name.clone(), value.resolve().await));
    }
    resolved_params.sort_by(|a, b| a.0.cmp(&b.0));

    {
        let mut query = parsed.query_pairs_mut();
        for (name, value) in &resolved_params {
            query.append_pair(name, value);
        }
        query.append_pair("offset", position.offset.as_str());
        if let Some(handle) = &position.handle {
            query.append_pair("handle", handle);
        }
        if replica == Replica::Full {
            query.append_pair("replica", replica.as_str());
        }
        if position.live {
            query.append_pair("live", "true");
            if let Some(cursor) = &position.cursor {
                query.append_pair("cursor", cursor);
            }
        }
    }

    let mut resolved_headers = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        resolved_headers.push((name.clone(), value.resolve().await));
    }
    resolved_headers.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(TransportRequest {
        url: parsed.to_string(),
        headers: resolved_headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(live: bool) -> RequestPosition {
        RequestPosition {
            offset: Offset::before_all(),
            handle: None,
            cursor: None,
            live,
        }
    }

    #[tokio::test]
    async fn test_initial_request_has_sentinel_offset_and_no_handle() {
        let mut params = HashMap::new();
        params.insert("table".to_string(), DynamicValue::from("issues"));

        let request = build_request(
            "http://localhost:3000/v1/shape",
            &params,
            &HashMap::new(),
            Replica::Partial,
            &position(false),
        )
        .await
        .unwrap();

        assert!(request.url.contains("offset=-1"));
        assert!(request.url.contains("table=issues"));
        assert!(!request.url.contains("handle="));
        assert!(!request.url.contains("live="));
        assert!(!request.url.contains("replica="));
    }

    #[tokio::test]
    async fn test_live_request_carries_handle_cursor_and_live_flag() {
        let request = build_request(
            "http://localhost:3000/v1/shape",
            &HashMap::new(),
            &HashMap::new(),
            Replica::Partial,
            &RequestPosition {
                offset: Offset::new("3_2"),
                handle: Some("h1".to_string()),
                cursor: Some("c9".to_string()),
                live: true,
            },
        )
        .await
        .unwrap();

        assert!(request.url.contains("offset=3_2"));
        assert!(request.url.contains("handle=h1"));
        assert!(request.url.contains("live=true"));
        assert!(request.url.contains("cursor=c9"));
    }

    #[tokio::test]
    async fn test_full_replica_param_is_appended() {
        let request = build_request(
            "http://localhost:3000/v1/shape",
            &HashMap::new(),
            &HashMap::new(),
            Replica::Full,
            &position(false),
        )
        .await
        .unwrap();
        assert!(request.url.contains("replica=full"));
    }

    #[tokio::test]
    async fn test_headers_resolved_and_sorted() {
        let mut headers = HashMap::new();
        headers.insert("x-b".to_string(), DynamicValue::from("2"));
        headers.insert(
            "x-a".to_string(),
            DynamicValue::resolver_sync(|| "fresh".to_string()),
        );

        let request = build_request(
            "http://localhost:3000/v1/shape",
            &HashMap::new(),
            &headers,
            Replica::Partial,
            &position(false),
        )
        .await
        .unwrap();

        assert_eq!(
            request.headers,
            vec![
                ("x-a".to_string(), "fresh".to_string()),
                ("x-b".to_string(), "2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_params_sorted_for_deterministic_urls() {
        let mut params = HashMap::new();
        params.insert("where".to_string(), DynamicValue::from("p > 5"));
        params.insert("table".to_string(), DynamicValue::from("issues"));
        params.insert("columns".to_string(), DynamicValue::from("id,title"));

        let a = build_request(
            "http://localhost:3000/v1/shape",
            &params,
            &HashMap::new(),
            Replica::Partial,
            &position(false),
        )
        .await
        .unwrap();
        let b = build_request(
            "http://localhost:3000/v1/shape",
            &params,
            &HashMap::new(),
            Replica::Partial,
            &position(false),
        )
        .await
        .unwrap();

        assert_eq!(a.url, b.url);
        let columns_pos = a.url.find("columns=").unwrap();
        let table_pos = a.url.find("table=").unwrap();
        let where_pos = a.url.find("where=").unwrap();
        assert!(columns_pos < table_pos && table_pos < where_pos);
    }
}
