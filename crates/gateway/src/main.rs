//! Process entry point: loads configuration, builds the shared policy core,
//! and spawns every listener (DNS UDP/TCP/DoH, HTTP forwarding proxy,
//! SOCKS5, control-plane RPC + websocket, metrics) against one
//! `Arc<PolicyEngine>`. Bootstrap sequence grounded on
//! `api-server/src/main.rs`.

mod control;
mod dns;
mod http_proxy;
mod metrics_http;
mod socks;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use policy_core::blocklist::{run_refresh_loop, BlocklistSet};
use policy_core::config::{ProxyConfig, ResolverConfig};
use policy_core::entitlement::{IpEntitlementCache, WalletEntitlementCache};
use policy_core::rate_limit::RateLimiter;
use policy_core::token::Verifier;
use policy_core::{analytics::AnalyticsClient, classifier::ClassifierClient};
use policy_core::PolicyEngine;
use tracing::{error, info, Level};

use dns::upstream::UpstreamResolver;
use dns::DnsPlane;
use http_proxy::HttpProxy;
use socks::SocksProxy;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting PayHole gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let resolver_cfg = ResolverConfig::from_env();
    let proxy_cfg = match ProxyConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration, refusing to start");
            std::process::exit(1);
        }
    };

    let blocklist = Arc::new(
        BlocklistSet::load_from_file(&resolver_cfg.blocklist_path)
            .await
            .unwrap_or_else(|_| BlocklistSet::empty()),
    );
    {
        let blocklist = blocklist.clone();
        let urls = resolver_cfg.blocklist_urls.clone();
        let cache_path = resolver_cfg.blocklist_cache_path.clone().map(PathBuf::from);
        let interval = resolver_cfg.blocklist_refresh_interval;
        let fetch_timeout = resolver_cfg.upstream_timeout;
        tokio::spawn(async move {
            run_refresh_loop(blocklist, urls, cache_path, fetch_timeout, interval).await;
        });
    }
    info!(count = blocklist.len(), "blocklist loaded");

    let premium = Arc::new(BlocklistSet::new(proxy_cfg.premium_domains.iter().cloned()));
    info!(count = premium.len(), "premium domain set loaded");

    let ip_cache = Arc::new(IpEntitlementCache::new());
    let wallet_cache = Arc::new(WalletEntitlementCache::new());

    let verifier = match Verifier::new(proxy_cfg.jwt_secret.clone(), wallet_cache.clone()) {
        Ok(v) => Some(Arc::new(v)),
        Err(e) => {
            error!(error = %e, "invalid payments secret, refusing to start");
            std::process::exit(1);
        }
    };

    let analytics = AnalyticsClient::new(proxy_cfg.analytics_url.clone());
    let classifier = ClassifierClient::new(proxy_cfg.classifier_url.clone());

    let policy = Arc::new(PolicyEngine::new(
        blocklist,
        premium,
        ip_cache.clone(),
        wallet_cache.clone(),
        verifier,
        analytics,
        classifier,
    ));

    let rate_limiter = RateLimiter::new(resolver_cfg.rate_limit.clone());
    rate_limiter.clone().start_cleanup_task();

    let upstream = Arc::new(UpstreamResolver::new(resolver_cfg.upstream_dns_addr.clone(), resolver_cfg.upstream_timeout));
    let dns_plane = Arc::new(DnsPlane { policy: policy.clone(), rate_limiter, upstream });

    let http_proxy = Arc::new(HttpProxy::new(policy.clone()));
    let socks_proxy = Arc::new(SocksProxy { policy: policy.clone() });

    let dns_udp_addr = bind_addr(&resolver_cfg.dns_addr);
    let dns_tcp_addr = bind_addr(&resolver_cfg.dns_addr);
    let doh_addr = bind_addr(&resolver_cfg.doh_addr);
    let metrics_addr = bind_addr(&resolver_cfg.metrics_addr);
    let control_rpc_addr = bind_addr(&resolver_cfg.control_plane_rpc_addr);
    let control_ws_addr = bind_addr(&resolver_cfg.control_plane_ws_addr);
    let http_proxy_addr = bind_addr(&proxy_cfg.http_proxy_addr);
    let socks_addr = bind_addr(&proxy_cfg.socks_proxy_addr);

    // Held for the process lifetime: dropping it would shut the RPC server down.
    let _rpc_handle = control::UnlockRpcServer::new(ip_cache.clone(), wallet_cache.clone())
        .start(control_rpc_addr.parse()?)
        .await?;

    let ws_router = control::ws_router(ip_cache, wallet_cache);
    tokio::spawn(serve_axum(control_ws_addr, ws_router, "control-plane websocket"));

    let metrics_router = metrics_http::router();
    tokio::spawn(serve_axum(metrics_addr, metrics_router, "metrics"));

    let doh_router = dns::doh::router(dns_plane.clone());
    tokio::spawn(serve_axum_with_connect_info(doh_addr, doh_router, "DoH"));

    tokio::spawn({
        let plane = dns_plane.clone();
        async move {
            if let Err(e) = dns::udp::serve(&dns_udp_addr, plane).await {
                error!(error = %e, "DNS UDP listener exited");
            }
        }
    });

    tokio::spawn({
        let plane = dns_plane;
        async move {
            if let Err(e) = dns::tcp::serve(&dns_tcp_addr, plane).await {
                error!(error = %e, "DNS TCP listener exited");
            }
        }
    });

    tokio::spawn(async move {
        if let Err(e) = http_proxy::serve(&http_proxy_addr, http_proxy).await {
            error!(error = %e, "HTTP proxy listener exited");
        }
    });

    tokio::spawn(async move {
        if let Err(e) = socks::serve(&socks_addr, socks_proxy).await {
            error!(error = %e, "SOCKS5 listener exited");
        }
    });

    info!("all listeners started, awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    Ok(())
}

/// Go-style `:PORT` addresses bind every interface; normalize to a literal
/// Rust socket address.
fn bind_addr(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    }
}

async fn serve_axum(addr: String, router: axum::Router, name: &'static str) {
    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            info!(addr, name, "listener started");
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, name, "listener exited");
            }
        }
        Err(e) => error!(error = %e, addr, name, "failed to bind"),
    }
}

async fn serve_axum_with_connect_info(addr: String, router: axum::Router, name: &'static str) {
    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            info!(addr, name, "listener started");
            let service = router.into_make_service_with_connect_info::<std::net::SocketAddr>();
            if let Err(e) = axum::serve(listener, service).await {
                error!(error = %e, name, "listener exited");
            }
        }
        Err(e) => error!(error = %e, addr, name, "failed to bind"),
    }
}
