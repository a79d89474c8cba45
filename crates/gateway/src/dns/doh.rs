//! DNS-over-HTTPS (RFC 8484). GET `?dns=<base64url>` and POST
//! `application/dns-message`, capped at 64 KiB. Grounded on
//! `original_source/proxy/internal/dnsproxy/server.go`'s DoH handler.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use super::{process_message, DnsPlane};
use crate::metrics_http::http_metrics_middleware;

const MAX_BODY: usize = 64 * 1024;

#[derive(Deserialize)]
pub struct DohQuery {
    dns: Option<String>,
}

/// Other HTTP methods on this path fall through to axum's default 405,
/// satisfying SPEC_FULL §8's "DoH method other than GET/POST ⇒ 405".
pub fn router(plane: Arc<DnsPlane>) -> Router {
    Router::new()
        .route("/dns-query", get(handle_get).post(handle_post))
        .layer(middleware::from_fn(http_metrics_middleware))
        .with_state(plane)
}

async fn handle_get(
    State(plane): State<Arc<DnsPlane>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(q): Query<DohQuery>,
) -> Response {
    let Some(encoded) = q.dns else {
        return (StatusCode::BAD_REQUEST, "missing dns parameter").into_response();
    };

    let Ok(query) = URL_SAFE_NO_PAD.decode(encoded.as_bytes()) else {
        return (StatusCode::BAD_REQUEST, "invalid base64url encoding").into_response();
    };

    if query.len() > MAX_BODY {
        return (StatusCode::BAD_REQUEST, "query too large").into_response();
    }

    respond(&plane, &query, remote).await
}

async fn handle_post(
    State(plane): State<Arc<DnsPlane>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let content_type = headers.get(axum::http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");
    if content_type != "application/dns-message" {
        return (StatusCode::BAD_REQUEST, "expected application/dns-message").into_response();
    }

    if body.len() > MAX_BODY {
        return (StatusCode::BAD_REQUEST, "body exceeds 64KiB").into_response();
    }

    respond(&plane, &body, remote).await
}

async fn respond(plane: &DnsPlane, query: &[u8], remote: SocketAddr) -> Response {
    let outcome = process_message(plane, query, &remote.to_string(), "doh").await;
    let status = if outcome.rate_limited { StatusCode::TOO_MANY_REQUESTS } else { StatusCode::OK };
    let mut resp = (status, outcome.bytes).into_response();
    resp.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/dns-message"),
    );
    resp
}
