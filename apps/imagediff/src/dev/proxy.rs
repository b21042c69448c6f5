//! Request forwarding for dev proxy rules.

use crate::error::{AppError, Result};
use axum::body::{Body, to_bytes};
use axum::extract::Request;
use axum::http::header::{CONNECTION, CONTENT_LENGTH, HOST};
use axum::http::{HeaderMap, HeaderName};
use axum::response::Response;
use imagediff_core::ProxyRule;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Largest request body forwarded upstream.
pub const MAX_FORWARD_BODY: usize = 32 * 1024 * 1024;

/// Upstream timeout.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP client shared by all forwarded requests.
pub fn build_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    Ok(client)
}

/// Remove the fixed hop-by-hop set plus any header named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(HeaderName::from_static(name));
    }
}

/// Forward `req` to `target` under `rule` and relay the upstream response.
pub async fn forward(
    client: &reqwest::Client,
    rule: &ProxyRule,
    target: Url,
    req: Request,
) -> Result<Response> {
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_FORWARD_BODY)
        .await
        .map_err(|e| AppError::BadRequest(format!("Cannot read request body: {}", e)))?;

    let mut headers = parts.headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(CONTENT_LENGTH);
    if rule.change_origin {
        // Let the client derive Host from the target authority.
        headers.remove(HOST);
    }

    debug!(
        method = %parts.method,
        path = %parts.uri.path(),
        target = %target,
        host = ?rule.host_header(),
        "Forwarding request"
    );

    let upstream = client
        .request(parts.method.clone(), target.clone())
        .headers(headers)
        .body(bytes)
        .send()
        .await
        .map_err(|e| {
            warn!(target = %target, error = %e, "Upstream request failed");
            AppError::Upstream(e)
        })?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);
    let payload = upstream.bytes().await?;

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}
