//! Prometheus text-exposition endpoint, plus the ambient HTTP request
//! middleware shared by every axum-served surface (DoH, control-plane
//! websocket, and this endpoint's own handler). Pattern grounded on
//! `api-server::middleware::metrics::{create_metrics_router, metrics_middleware}`.

use std::time::Instant;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

pub fn router() -> Router {
    Router::new().route("/", get(handler)).layer(middleware::from_fn(http_metrics_middleware))
}

async fn handler() -> impl IntoResponse {
    (StatusCode::OK, policy_core::metrics::encode_text())
}

/// Records request latency and count under `method`/`endpoint`/`status`
/// labels. Apply to every axum router in the process, not just this one.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = request.uri().path().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    policy_core::metrics::observe_http_request(&method, &endpoint, &status, start.elapsed().as_secs_f64());

    response
}
