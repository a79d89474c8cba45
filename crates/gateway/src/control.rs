//! Control-plane ingestion: a JSON-RPC `unlock_pushUnlock` method and a
//! `/control/unlock` websocket, both applying the same unlock event to the
//! shared entitlement cache. Grounded on
//! `original_source/edge/internal/controlplane/server.go`, with the gRPC
//! transport replaced by JSON-RPC (`jsonrpsee`, following
//! `Counselco-chronx/crates/chronx-rpc/src/server.rs`'s server-builder
//! pattern) since this workspace has no protobuf/gRPC stack to reuse.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::middleware;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use policy_core::entitlement::{IpEntitlementCache, WalletEntitlementCache};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::metrics_http::http_metrics_middleware;

const DEFAULT_UNLOCK_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Deserialize, Debug, Clone)]
pub struct UnlockRequest {
    #[serde(rename = "clientIp")]
    pub client_ip: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: Option<String>,
    pub wallet: Option<String>,
}

fn apply_unlock(ip_cache: &IpEntitlementCache, wallet_cache: &WalletEntitlementCache, req: &UnlockRequest) {
    if req.client_ip.is_empty() {
        return;
    }

    let expiry = req
        .expires_at
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|dt| SystemTime::from(dt.with_timezone(&Utc)))
        .unwrap_or_else(|| SystemTime::now() + DEFAULT_UNLOCK_TTL);

    ip_cache.authorize(&req.client_ip, req.wallet.as_deref(), expiry);
    if let Some(wallet) = req.wallet.as_deref() {
        wallet_cache.grant(wallet, expiry);
    }
    policy_core::metrics::set_premium_sessions(ip_cache.len() as f64);
}

// ── JSON-RPC surface ────────────────────────────────────────────────────────

#[rpc(server, namespace = "unlock")]
pub trait UnlockApi {
    #[method(name = "pushUnlock")]
    async fn push_unlock(&self, req: UnlockRequest) -> RpcResult<()>;
}

pub struct UnlockRpcServer {
    ip_cache: Arc<IpEntitlementCache>,
    wallet_cache: Arc<WalletEntitlementCache>,
}

impl UnlockRpcServer {
    pub fn new(ip_cache: Arc<IpEntitlementCache>, wallet_cache: Arc<WalletEntitlementCache>) -> Self {
        Self { ip_cache, wallet_cache }
    }

    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new().allow_methods(Any).allow_origin(Any).allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower_04_util::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "control-plane RPC server started");
        Ok(handle)
    }
}

#[async_trait]
impl UnlockApiServer for UnlockRpcServer {
    // `jsonrpsee`'s HTTP middleware stack has no grounded example of a
    // metrics tower::Layer in this codebase, so the same counters the axum
    // routers record via `http_metrics_middleware` are recorded by hand
    // here for this RPC method's single request/response cycle.
    async fn push_unlock(&self, req: UnlockRequest) -> RpcResult<()> {
        let start = Instant::now();
        let result = if req.client_ip.is_empty() {
            Err(ErrorObject::owned(-32602, "clientIp is required", None::<()>))
        } else {
            apply_unlock(&self.ip_cache, &self.wallet_cache, &req);
            Ok(())
        };

        let status = if result.is_ok() { "200" } else { "400" };
        policy_core::metrics::observe_http_request("RPC", "unlock_pushUnlock", status, start.elapsed().as_secs_f64());
        result
    }
}

// ── Websocket surface ────────────────────────────────────────────────────────

#[derive(Clone)]
struct ControlState {
    ip_cache: Arc<IpEntitlementCache>,
    wallet_cache: Arc<WalletEntitlementCache>,
}

pub fn ws_router(ip_cache: Arc<IpEntitlementCache>, wallet_cache: Arc<WalletEntitlementCache>) -> Router {
    Router::new()
        .route("/control/unlock", get(ws_handler))
        .layer(middleware::from_fn(http_metrics_middleware))
        .with_state(ControlState { ip_cache, wallet_cache })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ControlState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: ControlState) {
    loop {
        let Some(msg) = socket.recv().await else {
            return;
        };

        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => return,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "control-plane websocket read failed");
                return;
            }
        };

        match serde_json::from_str::<UnlockRequest>(&text) {
            Ok(req) => apply_unlock(&state.ip_cache, &state.wallet_cache, &req),
            Err(e) => warn!(error = %e, "invalid unlock payload, ignoring"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_unlock_ignores_empty_client_ip() {
        let ip_cache = IpEntitlementCache::new();
        let wallet_cache = WalletEntitlementCache::new();
        apply_unlock(&ip_cache, &wallet_cache, &UnlockRequest { client_ip: String::new(), expires_at: None, wallet: None });
        assert!(ip_cache.is_empty());
    }

    #[test]
    fn apply_unlock_authorizes_with_default_ttl() {
        let ip_cache = IpEntitlementCache::new();
        let wallet_cache = WalletEntitlementCache::new();
        apply_unlock(
            &ip_cache,
            &wallet_cache,
            &UnlockRequest { client_ip: "203.0.113.5".into(), expires_at: None, wallet: None },
        );
        assert!(ip_cache.lookup("203.0.113.5").is_some());
    }

    #[test]
    fn apply_unlock_honors_explicit_expiry() {
        let ip_cache = IpEntitlementCache::new();
        let wallet_cache = WalletEntitlementCache::new();
        let future = (Utc::now() + chrono::Duration::minutes(5)).to_rfc3339();
        apply_unlock(
            &ip_cache,
            &wallet_cache,
            &UnlockRequest { client_ip: "203.0.113.6".into(), expires_at: Some(future), wallet: Some("wallet-1".into()) },
        );
        assert!(ip_cache.lookup("203.0.113.6").is_some());
    }

    #[test]
    fn apply_unlock_grants_wallet_cache_alongside_ip_cache() {
        let ip_cache = IpEntitlementCache::new();
        let wallet_cache = WalletEntitlementCache::new();
        let future = (Utc::now() + chrono::Duration::minutes(10)).to_rfc3339();
        apply_unlock(
            &ip_cache,
            &wallet_cache,
            &UnlockRequest { client_ip: "203.0.113.5".into(), expires_at: Some(future), wallet: Some("wx".into()) },
        );
        assert!(ip_cache.lookup("203.0.113.5").is_some());
        assert!(wallet_cache.authorized("wx"));
    }

    #[test]
    fn apply_unlock_falls_back_on_unparseable_expiry() {
        let ip_cache = IpEntitlementCache::new();
        let wallet_cache = WalletEntitlementCache::new();
        apply_unlock(
            &ip_cache,
            &wallet_cache,
            &UnlockRequest { client_ip: "203.0.113.7".into(), expires_at: Some("not-a-date".into()), wallet: None },
        );
        assert!(ip_cache.lookup("203.0.113.7").is_some());
    }
}
