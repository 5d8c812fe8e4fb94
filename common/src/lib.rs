use std::net::IpAddr;

use axum::http::HeaderMap;

pub mod args;
pub mod shutdown;

/// Client address for access logging and the WebSocket connection caps.
/// Precedence: first hop of `X-Forwarded-For`, then `X-Real-IP`; `None`
/// when neither header carries a parseable address (direct connections are
/// logged by the listener, not here).
pub fn source_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header_ip = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|value| value.trim().parse().ok())
    };
    header_ip("x-forwarded-for").or_else(|| header_ip("x-real-ip"))
}

pub mod access_log {
    use axum::http::StatusCode;

    use super::source_ip;

    /// One structured line per request. The `X-Amz-Target` action is the
    /// interesting discriminator on this wire, so it is logged alongside
    /// the method and path.
    pub async fn api(
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> axum::response::Response {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let target = req
            .headers()
            .get("x-amz-target")
            .and_then(|t| t.to_str().ok())
            .unwrap_or("-")
            .to_string();
        let source = source_ip(req.headers())
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".into());

        let start = std::time::Instant::now();
        let response = next.run(req).await;
        let elapsed = start.elapsed();
        let status = response.status();

        // 101 Switching Protocols is the WebSocket upgrade path.
        if status.is_success() || status == StatusCode::SWITCHING_PROTOCOLS {
            tracing::info!(
                %method,
                path,
                target,
                status = status.as_u16(),
                ?elapsed,
                source,
                "request"
            );
        } else {
            tracing::warn!(
                %method,
                path,
                target,
                status = status.as_u16(),
                ?elapsed,
                source,
                "request failed"
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_source_ip_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(source_ip(&headers), Some("10.0.0.2".parse().unwrap()));

        // X-Forwarded-For wins, and only its first hop counts.
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("10.0.0.1, 192.168.0.9"),
        );
        assert_eq!(source_ip(&headers), Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_source_ip_absent_or_garbage() {
        assert_eq!(source_ip(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        assert_eq!(source_ip(&headers), None);
    }
}
