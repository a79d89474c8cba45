//! Environment-driven configuration, one `from_env()` per concern, following
//! the host project's `AuthConfig::from_env()` / `RateLimitConfig::from_env()`
//! pattern: parse with sane defaults, fail fast and loudly on anything that
//! would leave the process insecure.

use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::rate_limit::RateLimitConfig;

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_csv(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_duration(key: &str, default: Duration) -> Duration {
    std::env::var(key).ok().and_then(|v| humantime_parse(&v)).unwrap_or(default)
}

/// Minimal duration parser covering the forms this system's env vars use
/// (`5s`, `10m`, `12h`), avoiding a dependency on a full duration-parsing
/// crate for four suffix cases.
fn humantime_parse(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (num, unit) = s.split_at(s.len().saturating_sub(1));
    let n: u64 = num.parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(n)),
        "m" => Some(Duration::from_secs(n * 60)),
        "h" => Some(Duration::from_secs(n * 3600)),
        _ => s.parse::<u64>().ok().map(Duration::from_secs),
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub doh_addr: String,
    pub dns_addr: String,
    pub metrics_addr: String,
    pub control_plane_rpc_addr: String,
    pub control_plane_ws_addr: String,
    pub upstream_dns_addr: String,
    pub upstream_timeout: Duration,
    pub blocklist_path: String,
    pub blocklist_cache_path: Option<String>,
    pub blocklist_urls: Vec<String>,
    pub blocklist_refresh_interval: Duration,
    pub rate_limit: RateLimitConfig,
}

impl ResolverConfig {
    pub fn from_env() -> Self {
        let rps = std::env::var("RATE_LIMIT_RPS").ok().and_then(|v| v.parse().ok()).unwrap_or(20.0);
        let burst = std::env::var("RATE_LIMIT_BURST").ok().and_then(|v| v.parse().ok()).unwrap_or(40.0);
        let ttl = env_duration("RATE_LIMIT_TTL", Duration::from_secs(600));

        Self {
            doh_addr: env_string("RESOLVER_DOH_ADDR", ":8053"),
            dns_addr: env_string("RESOLVER_DNS_ADDR", ":53"),
            metrics_addr: env_string("RESOLVER_METRICS_ADDR", ":9102"),
            control_plane_rpc_addr: env_string("RESOLVER_CONTROL_PLANE_GRPC", ":9600"),
            control_plane_ws_addr: env_string("RESOLVER_CONTROL_PLANE_WS", ":9601"),
            upstream_dns_addr: env_string("UPSTREAM_DNS_ADDR", "1.1.1.1:53"),
            upstream_timeout: env_duration("UPSTREAM_TIMEOUT", Duration::from_secs(5)),
            blocklist_path: env_string("BLOCKLIST_PATH", "blocklist.txt"),
            blocklist_cache_path: std::env::var("BLOCKLIST_CACHE_PATH").ok(),
            blocklist_urls: env_csv("BLOCKLIST_URLS"),
            blocklist_refresh_interval: env_duration("BLOCKLIST_REFRESH_INTERVAL", Duration::from_secs(12 * 3600)),
            rate_limit: RateLimitConfig::new(rps, burst, ttl),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub http_proxy_addr: String,
    pub socks_proxy_addr: String,
    pub premium_domains: Vec<String>,
    pub jwt_secret: Vec<u8>,
    pub analytics_url: Option<String>,
    pub classifier_url: Option<String>,
}

impl ProxyConfig {
    /// Fails fast (nonzero exit, via the returned `CoreError`) when
    /// `PAYMENTS_JWT_SECRET` is missing or shorter than 32 bytes — this
    /// config is useless (and dangerously weak) without a real secret.
    pub fn from_env() -> CoreResult<Self> {
        let jwt_secret = std::env::var("PAYMENTS_JWT_SECRET")
            .map_err(|_| CoreError::Config("PAYMENTS_JWT_SECRET is required".into()))?
            .into_bytes();

        if jwt_secret.len() < 32 {
            return Err(CoreError::WeakSecret(jwt_secret.len()));
        }

        let premium_domains = {
            let v = env_csv("PREMIUM_DOMAINS");
            if v.is_empty() {
                vec!["premium.payhole.news".to_string(), "exclusive.payhole.media".to_string()]
            } else {
                v
            }
        };

        Ok(Self {
            http_proxy_addr: env_string("HTTP_PROXY_ADDR", ":8080"),
            socks_proxy_addr: env_string("SOCKS_PROXY_ADDR", ":1080"),
            premium_domains,
            jwt_secret,
            analytics_url: std::env::var("ANALYTICS_URL").ok().filter(|s| !s.is_empty()),
            classifier_url: std::env::var("CLASSIFIER_URL").ok().filter(|s| !s.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests that touch process environment share this lock, matching the
    // host project's EnvVarGuard convention (serialize env-mutating tests so
    // they don't race each other under `cargo test`'s shared process).
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, previous }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn missing_jwt_secret_is_an_error() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::remove_var("PAYMENTS_JWT_SECRET");
        assert!(ProxyConfig::from_env().is_err());
    }

    #[test]
    fn short_jwt_secret_is_an_error() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _g = EnvVarGuard::set("PAYMENTS_JWT_SECRET", "too-short");
        assert!(matches!(ProxyConfig::from_env(), Err(CoreError::WeakSecret(_))));
    }

    #[test]
    fn valid_jwt_secret_parses_with_premium_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _g = EnvVarGuard::set("PAYMENTS_JWT_SECRET", "01234567890123456789012345678901");
        std::env::remove_var("PREMIUM_DOMAINS");
        let cfg = ProxyConfig::from_env().unwrap();
        assert_eq!(cfg.premium_domains, vec!["premium.payhole.news", "exclusive.payhole.media"]);
    }

    #[test]
    fn duration_parsing_handles_suffixes() {
        assert_eq!(humantime_parse("5s"), Some(Duration::from_secs(5)));
        assert_eq!(humantime_parse("10m"), Some(Duration::from_secs(600)));
        assert_eq!(humantime_parse("12h"), Some(Duration::from_secs(43200)));
    }
}
