//! HTTP(S) forwarding proxy. Grounded on
//! `original_source/proxy/internal/httpproxy/proxy.go`.
//!
//! `CONNECT` is rejected (501) — this proxy inspects the plaintext Host of
//! every request to evaluate policy, so it cannot support opaque tunnels
//! (SPEC_FULL §9, non-goal confirmation).

pub mod paywall;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{AUTHORIZATION, CONTENT_LENGTH, HOST, UPGRADE};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use policy_core::entitlement::extract_ip;
use policy_core::{Decision, PolicyEngine, Reason};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

type ProxyBody = Full<Bytes>;
type HyperClient = Client<HttpConnector, ProxyBody>;

pub struct HttpProxy {
    pub policy: Arc<PolicyEngine>,
    client: HyperClient,
}

impl HttpProxy {
    pub fn new(policy: Arc<PolicyEngine>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { policy, client }
    }
}

pub async fn serve(addr: &str, proxy: Arc<HttpProxy>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "HTTP proxy listener started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let proxy = proxy.clone();
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, peer, proxy.clone()));
            if let Err(e) = hyper::server::conn::http1::Builder::new().serve_connection(io, service).with_upgrades().await {
                warn!(error = %e, "http proxy connection error");
            }
        });
    }
}

async fn handle(
    req: Request<Incoming>,
    peer: SocketAddr,
    proxy: Arc<HttpProxy>,
) -> Result<Response<ProxyBody>, Infallible> {
    if req.method() == Method::CONNECT {
        return Ok(text_response(StatusCode::NOT_IMPLEMENTED, "CONNECT is not supported"));
    }

    let remote = peer.to_string();
    let host = target_host(&req);
    let auth_header = req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()).map(str::to_string);

    let decision = proxy.policy.decide(&host, &remote, auth_header.as_deref()).await;

    match decision.reason {
        Reason::AdBlocked => Ok(text_response(StatusCode::FORBIDDEN, "blocked by filter")),
        Reason::PremiumRequired => Ok(paywall::render(&host)),
        Reason::ModelRisk => Ok(text_response(StatusCode::from_u16(451).unwrap(), "blocked by risk model")),
        Reason::Allowed => Ok(forward(req, &remote, &proxy.client, &decision).await),
    }
}

fn target_host(req: &Request<Incoming>) -> String {
    if let Some(host) = req.uri().host() {
        return host.to_string();
    }
    req.headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.rsplit_once(':').map(|(h, _)| h).unwrap_or(h).to_string())
        .unwrap_or_default()
}

async fn forward(mut req: Request<Incoming>, remote: &str, client: &HyperClient, _decision: &Decision) -> Response<ProxyBody> {
    req.headers_mut().remove(AUTHORIZATION);
    req.headers_mut().remove(hyper::header::PROXY_AUTHORIZATION);

    if req.uri().scheme().is_none() {
        let scheme = if req.headers().get(UPGRADE).is_some() { "ws" } else { "http" };
        let authority = req
            .uri()
            .authority()
            .cloned()
            .or_else(|| req.headers().get(HOST).and_then(|v| v.to_str().ok()).and_then(|h| h.parse().ok()));

        if let Some(authority) = authority {
            let path = req.uri().path_and_query().cloned();
            let mut builder = hyper::Uri::builder().scheme(scheme).authority(authority);
            if let Some(p) = path {
                builder = builder.path_and_query(p);
            }
            if let Ok(new_uri) = builder.build() {
                *req.uri_mut() = new_uri;
            }
        }
    }

    let client_ip = extract_ip(remote);
    let xff_value = match req.headers().get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip,
    };
    if let Ok(v) = xff_value.parse() {
        req.headers_mut().insert("x-forwarded-for", v);
    }

    let zero_length = req.headers().get(CONTENT_LENGTH).and_then(|v| v.to_str().ok()) == Some("0");

    let (parts, body) = req.into_parts();
    let buffered = if zero_length {
        Bytes::new()
    } else {
        match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                error!(error = %e, "failed to read client body");
                return text_response(StatusCode::BAD_REQUEST, "failed to read request body");
            }
        }
    };
    let req = Request::from_parts(parts, Full::new(buffered));

    match client.request(req).await {
        Ok(resp) => {
            let (parts, body) = resp.into_parts();
            match body.collect().await {
                Ok(collected) => Response::from_parts(parts, Full::new(collected.to_bytes())),
                Err(e) => {
                    warn!(error = %e, "failed to read upstream body, swallowing");
                    Response::from_parts(parts, Full::new(Bytes::new()))
                }
            }
        }
        Err(e) => {
            error!(error = %e, "upstream dial failed");
            text_response(StatusCode::BAD_GATEWAY, "upstream dial failed")
        }
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<ProxyBody> {
    Response::builder().status(status).body(Full::new(Bytes::from_static(body.as_bytes()))).unwrap()
}
