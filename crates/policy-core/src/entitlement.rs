//! IP→wallet and wallet→expiry entitlement caches with lazy expiry.
//!
//! Grounded on `original_source/proxy/internal/auth/cache.go` (`IPCache`) for
//! the lazy-delete-on-lookup shape. The two caches are independent (SPEC_FULL
//! §9, "hierarchical entitlement state") so control-plane pushes (IP-only) and
//! token-plane derivations (wallet-bearing) never need shared ownership.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

/// Strip a trailing `:port`, if present, accepting bare IPv4/IPv6 literals
/// either way. Both data planes perform this normalization so cache keys
/// written by one plane are visible to lookups from the other.
pub fn extract_ip(remote_addr: &str) -> String {
    if remote_addr.parse::<std::net::IpAddr>().is_ok() {
        return remote_addr.to_string();
    }
    if let Ok(sock) = remote_addr.parse::<std::net::SocketAddr>() {
        return sock.ip().to_string();
    }
    // Fallback for "host:port" strings that aren't valid SocketAddr (e.g. a
    // hostname), matching `net.SplitHostPort` semantics.
    match remote_addr.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_string(),
        _ => remote_addr.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct IpEntitlement {
    pub wallet: Option<String>,
    pub expiry: SystemTime,
}

/// IP → (wallet?, expiry), keyed by bare IP (port stripped).
pub struct IpEntitlementCache {
    entries: RwLock<HashMap<String, IpEntitlement>>,
}

impl IpEntitlementCache {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// Wallet may be absent (the DNS plane's control-plane variant grants by
    /// IP alone). A request with an empty IP or empty wallet (when a wallet
    /// *is* supplied) is ignored.
    pub fn authorize(&self, remote_addr: &str, wallet: Option<&str>, expiry: SystemTime) {
        let ip = extract_ip(remote_addr);
        if ip.is_empty() {
            return;
        }
        if let Some(w) = wallet {
            if w.is_empty() {
                return;
            }
        }
        let mut entries = self.entries.write().expect("ip cache lock poisoned");
        entries.insert(ip, IpEntitlement { wallet: wallet.map(str::to_string), expiry });
    }

    /// Expired entries are deleted on lookup.
    pub fn lookup(&self, remote_addr: &str) -> Option<IpEntitlement> {
        let ip = extract_ip(remote_addr);
        let now = SystemTime::now();

        let hit = {
            let entries = self.entries.read().expect("ip cache lock poisoned");
            entries.get(&ip).cloned()
        };

        match hit {
            Some(e) if e.expiry > now => Some(e),
            Some(_) => {
                self.entries.write().expect("ip cache lock poisoned").remove(&ip);
                None
            }
            None => None,
        }
    }

    pub fn purge(&self) {
        let now = SystemTime::now();
        self.entries.write().expect("ip cache lock poisoned").retain(|_, e| e.expiry > now);
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("ip cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IpEntitlementCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Wallet → expiry, independent of the IP cache.
pub struct WalletEntitlementCache {
    entries: RwLock<HashMap<String, SystemTime>>,
}

impl WalletEntitlementCache {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    pub fn grant(&self, wallet: &str, expiry: SystemTime) {
        if wallet.is_empty() {
            return;
        }
        self.entries.write().expect("wallet cache lock poisoned").insert(wallet.to_string(), expiry);
    }

    pub fn authorized(&self, wallet: &str) -> bool {
        self.expiry(wallet).is_some()
    }

    /// Returns the expiry when still valid; deletes the entry (and returns
    /// `None`) when it has lapsed.
    pub fn expiry(&self, wallet: &str) -> Option<SystemTime> {
        let now = SystemTime::now();
        let hit = { self.entries.read().expect("wallet cache lock poisoned").get(wallet).copied() };

        match hit {
            Some(t) if t > now => Some(t),
            Some(_) => {
                self.entries.write().expect("wallet cache lock poisoned").remove(wallet);
                None
            }
            None => None,
        }
    }

    pub fn purge(&self) {
        let now = SystemTime::now();
        self.entries.write().expect("wallet cache lock poisoned").retain(|_, t| *t > now);
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("wallet cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WalletEntitlementCache {
    fn default() -> Self {
        Self::new()
    }
}

pub fn thirty_seconds() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn future(secs: u64) -> SystemTime {
        SystemTime::now() + Duration::from_secs(secs)
    }

    fn past() -> SystemTime {
        SystemTime::now() - Duration::from_secs(5)
    }

    #[test]
    fn extract_ip_strips_port_both_forms() {
        assert_eq!(extract_ip("198.51.100.12:5432"), "198.51.100.12");
        assert_eq!(extract_ip("198.51.100.12"), "198.51.100.12");
        assert_eq!(extract_ip("[::1]:8080"), "::1");
    }

    #[test]
    fn ip_cache_lazy_expiry() {
        let cache = IpEntitlementCache::new();
        cache.authorize("203.0.113.5:1111", Some("wx"), future(30));
        assert!(cache.lookup("203.0.113.5:9999").is_some());

        cache.authorize("203.0.113.6:1", Some("wy"), past());
        assert!(cache.lookup("203.0.113.6:2").is_none());
    }

    #[test]
    fn ip_cache_ignores_empty_ip() {
        let cache = IpEntitlementCache::new();
        cache.authorize("", Some("wx"), future(30));
        assert!(cache.lookup("").is_none());
    }

    #[test]
    fn wallet_cache_lazy_expiry() {
        let cache = WalletEntitlementCache::new();
        cache.grant("wallet123", future(60));
        assert!(cache.authorized("wallet123"));

        cache.grant("expired", past());
        assert!(!cache.authorized("expired"));
        assert!(cache.expiry("expired").is_none());
    }

    #[test]
    fn purge_sweeps_all_expired() {
        let cache = IpEntitlementCache::new();
        cache.authorize("1.1.1.1", None, past());
        cache.authorize("2.2.2.2", None, future(60));
        cache.purge();
        assert!(cache.lookup("2.2.2.2").is_some());
    }
}
