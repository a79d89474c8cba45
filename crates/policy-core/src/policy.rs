//! The policy engine: `decide(host, remote, auth_header) -> Decision`.
//!
//! Grounded on `original_source/proxy/internal/policy/policy.go` (`Decide`,
//! `isAuthorized`, `canonicalizeHost`).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::analytics::AnalyticsClient;
use crate::blocklist::BlocklistSet;
use crate::classifier::{ClassifierClient, ClassifyRequest};
use crate::domain_name::canonicalize;
use crate::entitlement::{thirty_seconds, IpEntitlementCache, WalletEntitlementCache};
use crate::token::{extract_bearer, Verifier};

const CLASSIFIER_DEADLINE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    Allowed,
    AdBlocked,
    PremiumRequired,
    ModelRisk,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub allow: bool,
    pub status_code: u16,
    pub reason: Reason,
}

impl Decision {
    fn allowed() -> Self {
        Self { allow: true, status_code: 200, reason: Reason::Allowed }
    }

    fn ad_blocked() -> Self {
        Self { allow: false, status_code: 403, reason: Reason::AdBlocked }
    }

    fn premium_required() -> Self {
        Self { allow: false, status_code: 402, reason: Reason::PremiumRequired }
    }

    fn model_risk() -> Self {
        Self { allow: false, status_code: 451, reason: Reason::ModelRisk }
    }
}

pub struct PolicyEngine {
    pub blocklist: Arc<BlocklistSet>,
    pub premium: Arc<BlocklistSet>,
    pub ip_cache: Arc<IpEntitlementCache>,
    pub wallet_cache: Arc<WalletEntitlementCache>,
    pub verifier: Option<Arc<Verifier>>,
    pub analytics: AnalyticsClient,
    pub classifier: ClassifierClient,
}

impl PolicyEngine {
    pub fn new(
        blocklist: Arc<BlocklistSet>,
        premium: Arc<BlocklistSet>,
        ip_cache: Arc<IpEntitlementCache>,
        wallet_cache: Arc<WalletEntitlementCache>,
        verifier: Option<Arc<Verifier>>,
        analytics: AnalyticsClient,
        classifier: ClassifierClient,
    ) -> Self {
        Self { blocklist, premium, ip_cache, wallet_cache, verifier, analytics, classifier }
    }

    pub async fn decide(&self, host: &str, remote_addr: &str, auth_header: Option<&str>) -> Decision {
        let canon = canonicalize(host);
        if canon.is_empty() {
            return Decision::allowed();
        }

        let authorized = self.is_authorized(remote_addr, auth_header);

        if self.blocklist.contains(&canon) {
            self.analytics.record_blocked(&canon, remote_addr, "AD_BLOCKED");
            return Decision::ad_blocked();
        }

        if self.premium.contains(&canon) && !authorized {
            self.analytics.record_blocked(&canon, remote_addr, "PREMIUM_REQUIRED");
            return Decision::premium_required();
        }

        if self.classifier.enabled() {
            let request_id = uuid::Uuid::new_v4().to_string();
            let resp = self
                .classifier
                .predict(
                    ClassifyRequest { request_id, domain: canon.clone(), numerical: vec![], categorical: vec![] },
                    CLASSIFIER_DEADLINE,
                )
                .await;
            if resp.is_block() {
                return Decision::model_risk();
            }
        }

        Decision::allowed()
    }

    /// The stronger (join) variant: an IP-cache hit only counts if its
    /// wallet (when present) is still valid in the wallet cache — a wallet's
    /// expiry invalidates any IP-cache entry riding on it.
    fn is_authorized(&self, remote_addr: &str, auth_header: Option<&str>) -> bool {
        if let Some(entry) = self.ip_cache.lookup(remote_addr) {
            let wallet_still_valid = match &entry.wallet {
                Some(w) => self.wallet_cache.authorized(w),
                None => true,
            };
            if wallet_still_valid {
                return true;
            }
        }

        let Some(verifier) = &self.verifier else { return false };
        let Some(header) = auth_header else { return false };
        let Some(token) = extract_bearer(header) else { return false };

        match verifier.verify(token) {
            Ok(claims) => {
                let cap = SystemTime::now() + thirty_seconds();
                let ip_expiry = claims.expiry.min(cap);
                self.ip_cache.authorize(remote_addr, Some(&claims.wallet), ip_expiry);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use std::time::UNIX_EPOCH;

    fn secret32() -> Vec<u8> {
        b"01234567890123456789012345678901".to_vec()
    }

    fn engine_with(blocklist: &[&str], premium: &[&str], secret: Option<Vec<u8>>) -> PolicyEngine {
        let wallet_cache = Arc::new(WalletEntitlementCache::new());
        let verifier = secret.map(|s| Arc::new(Verifier::new(s, wallet_cache.clone()).unwrap()));
        PolicyEngine::new(
            Arc::new(BlocklistSet::new(blocklist.iter().map(|s| s.to_string()))),
            Arc::new(BlocklistSet::new(premium.iter().map(|s| s.to_string()))),
            Arc::new(IpEntitlementCache::new()),
            wallet_cache,
            verifier,
            AnalyticsClient::new(None),
            ClassifierClient::new(None),
        )
    }

    fn sign(wallet: &str, exp_secs: u64, secret: &[u8]) -> String {
        #[derive(serde::Serialize)]
        struct C {
            wallet: String,
            exp: u64,
        }
        let exp = std::time::SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() + exp_secs;
        encode(&Header::new(Algorithm::HS256), &C { wallet: wallet.to_string(), exp }, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[tokio::test]
    async fn empty_host_is_allowed() {
        let engine = engine_with(&["ads.example.com"], &[], None);
        let d = engine.decide("", "1.2.3.4:1", None).await;
        assert!(d.allow);
    }

    #[tokio::test]
    async fn blocklist_wins_regardless_of_authorization() {
        let engine = engine_with(&["ads.example.com"], &["ads.example.com"], None);
        let d = engine.decide("video.ads.example.com", "1.2.3.4:1", None).await;
        assert!(!d.allow);
        assert_eq!(d.reason, Reason::AdBlocked);
        assert_eq!(d.status_code, 403);
    }

    #[tokio::test]
    async fn premium_without_token_requires_payment() {
        let engine = engine_with(&[], &["premium.test"], None);
        let d = engine.decide("premium.test", "198.51.100.12:5432", None).await;
        assert!(!d.allow);
        assert_eq!(d.reason, Reason::PremiumRequired);
        assert_eq!(d.status_code, 402);
    }

    #[tokio::test]
    async fn premium_with_valid_token_is_allowed_and_caches_ip() {
        let secret = secret32();
        let engine = engine_with(&[], &["premium.test"], Some(secret.clone()));
        let token = sign("wallet123", 3600, &secret);
        let header = format!("Bearer {token}");

        let d = engine.decide("premium.test", "198.51.100.12:5432", Some(&header)).await;
        assert!(d.allow);

        let cached = engine.ip_cache.lookup("198.51.100.12:9999").unwrap();
        assert_eq!(cached.wallet.as_deref(), Some("wallet123"));
        let remaining = cached.expiry.duration_since(SystemTime::now()).unwrap();
        assert!(remaining <= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn wallet_expiry_invalidates_ip_cache_entry() {
        let engine = engine_with(&[], &["premium.test"], None);
        engine.ip_cache.authorize("9.9.9.9:1", Some("stale-wallet"), SystemTime::now() + Duration::from_secs(60));
        // wallet cache never granted "stale-wallet" -> join must fail it
        let d = engine.decide("premium.test", "9.9.9.9:1", None).await;
        assert_eq!(d.reason, Reason::PremiumRequired);
    }

    #[tokio::test]
    async fn non_blocklisted_non_premium_host_is_allowed() {
        let engine = engine_with(&["ads.example.com"], &["premium.test"], None);
        let d = engine.decide("allowed.test", "1.2.3.4:1", None).await;
        assert!(d.allow);
        assert_eq!(d.reason, Reason::Allowed);
    }
}
