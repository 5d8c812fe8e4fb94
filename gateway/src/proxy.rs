//! Catch-all reverse proxy to the upstream simulated-cloud service.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Hop-by-hop headers never forwarded in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

#[derive(Clone)]
pub struct UpstreamProxy {
    client: reqwest::Client,
    endpoint: String,
}

impl UpstreamProxy {
    pub fn new(endpoint: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .read_timeout(READ_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()?;
        Ok(Self { client, endpoint })
    }

    pub async fn forward(
        &self,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Response {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(uri.path());
        let url = format!("{}{}", self.endpoint.trim_end_matches('/'), path_and_query);

        let mut request = self
            .client
            .request(method, &url)
            .body(body);
        for (name, value) in headers {
            let lname = name.as_str().to_lowercase();
            if HOP_BY_HOP.contains(&lname.as_str()) || lname == "host" {
                continue;
            }
            request = request.header(name, value);
        }
        if !headers.contains_key("x-forwarded-host")
            && let Some(host) = headers.get("host")
        {
            request = request.header("x-forwarded-host", host);
        }

        match request.send().await {
            Ok(upstream) => {
                let status = StatusCode::from_u16(upstream.status().as_u16())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                let mut response_headers = HeaderMap::new();
                for (name, value) in upstream.headers() {
                    if HOP_BY_HOP.contains(&name.as_str()) {
                        continue;
                    }
                    if let (Ok(name), Ok(value)) = (
                        HeaderName::from_bytes(name.as_str().as_bytes()),
                        axum::http::HeaderValue::from_bytes(value.as_bytes()),
                    ) {
                        response_headers.insert(name, value);
                    }
                }
                let bytes = upstream.bytes().await.unwrap_or_default();
                (status, response_headers, bytes).into_response()
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %url, "upstream proxy request failed");
                (
                    StatusCode::BAD_GATEWAY,
                    format!("upstream unavailable: {}", e),
                )
                    .into_response()
            }
        }
    }
}
