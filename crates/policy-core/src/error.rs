//! Error types shared by every policy-core collaborator.
//!
//! These never reach a client directly: each data-plane edge (DNS, HTTP,
//! control plane) maps a `CoreError` to its own wire representation (a DNS
//! rcode, an HTTP status, a logged-and-continue) rather than propagating it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("blocklist fetch failed: {0}")]
    BlocklistFetch(String),

    #[error("blocklist file io failed: {0}")]
    BlocklistIo(#[from] std::io::Error),

    #[error("token secret too short: need at least 32 bytes, got {0}")]
    WeakSecret(usize),

    #[error("token verification failed: {0}")]
    TokenInvalid(String),

    #[error("upstream DNS exchange failed: {0}")]
    UpstreamDns(String),

    #[error("upstream DNS exchange timed out")]
    UpstreamTimeout,

    #[error("malformed DNS message: {0}")]
    MalformedMessage(String),

    #[error("forward request failed: {0}")]
    ForwardFailed(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
