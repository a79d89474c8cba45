//! DNS request pipeline shared by UDP, TCP, and DoH transports. Grounded on
//! `original_source/edge/internal/resolver/server.go`.

pub mod doh;
pub mod tcp;
pub mod udp;
pub mod upstream;
pub mod wire;

use std::sync::Arc;
use std::time::Instant;

use policy_core::entitlement::extract_ip;
use policy_core::rate_limit::RateLimiter;
use policy_core::PolicyEngine;
use tracing::{info_span, warn, Instrument};

use upstream::UpstreamResolver;
use wire::{build_reply, first_question_name, query_id, question_count, RCODE_REFUSED, RCODE_SERVFAIL};

pub struct DnsPlane {
    pub policy: Arc<PolicyEngine>,
    pub rate_limiter: RateLimiter,
    pub upstream: Arc<UpstreamResolver>,
}

/// Result of running the pipeline for one message: the wire bytes to send
/// back, plus whether the request was rejected for exceeding its rate limit
/// (DoH maps this to 429; UDP/TCP have no status code and just send the
/// REFUSED reply either way).
pub struct DnsOutcome {
    pub bytes: Vec<u8>,
    pub rate_limited: bool,
}

/// Runs the full pipeline for one message and returns the bytes to write
/// back to the client (always produces a reply — SERVFAIL/REFUSED on any
/// failure path, never silence).
pub async fn process_message(plane: &DnsPlane, query: &[u8], remote_addr: &str, protocol: &'static str) -> DnsOutcome {
    let client_ip = extract_ip(remote_addr);
    let span = info_span!("dns_query", protocol, client_ip = %client_ip);

    async move {
        if !plane.rate_limiter.allow(&client_ip).await {
            policy_core::metrics::record_rate_limited();
            policy_core::metrics::record_dns_query("rate_limited", protocol);
            return DnsOutcome { bytes: build_reply(query, RCODE_REFUSED), rate_limited: true };
        }

        if question_count(query) == 0 {
            policy_core::metrics::record_dns_query("error", protocol);
            return DnsOutcome { bytes: build_reply(query, RCODE_SERVFAIL), rate_limited: false };
        }

        let Some(name) = first_question_name(query) else {
            policy_core::metrics::record_dns_query("error", protocol);
            return DnsOutcome { bytes: build_reply(query, RCODE_SERVFAIL), rate_limited: false };
        };

        let decision = plane.policy.decide(&name, &client_ip, None).await;
        if !decision.allow {
            policy_core::metrics::record_dns_query("blocked", protocol);
            return DnsOutcome { bytes: build_reply(query, RCODE_REFUSED), rate_limited: false };
        }

        let started = Instant::now();
        match plane.upstream.exchange(query).await {
            Ok(mut response) => {
                if let Some(id) = query_id(query) {
                    wire::rewrite_id(&mut response, id);
                }
                policy_core::metrics::observe_upstream_duration(protocol, started.elapsed().as_secs_f64());
                policy_core::metrics::record_dns_query("allowed", protocol);
                DnsOutcome { bytes: response, rate_limited: false }
            }
            Err(e) => {
                warn!(error = %e, "upstream exchange failed");
                policy_core::metrics::record_dns_query("error", protocol);
                DnsOutcome { bytes: build_reply(query, RCODE_SERVFAIL), rate_limited: false }
            }
        }
    }
    .instrument(span)
    .await
}
