//! Fire-and-forget blocked-request event posting. Grounded on
//! `original_source/proxy/internal/analytics/client.go`: a 3s-timeout HTTP
//! client, a detached task per event, every outcome (success or failure)
//! discarded so analytics never touches the hot path.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsEvent {
    pub domain: String,
    pub client_ip: String,
    pub reason: String,
    pub timestamp: String,
}

#[derive(Clone)]
pub struct AnalyticsClient {
    endpoint: Option<String>,
    http: reqwest::Client,
}

impl AnalyticsClient {
    pub fn new(endpoint: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_default();
        Self { endpoint: endpoint.filter(|e| !e.is_empty()), http }
    }

    pub fn enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Spawns a detached task; never awaited by the caller, never surfaces
    /// an error.
    pub fn record_blocked(&self, domain: &str, client_ip: &str, reason: &str) {
        let Some(endpoint) = self.endpoint.clone() else { return };
        let event = AnalyticsEvent {
            domain: domain.to_string(),
            client_ip: client_ip.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        let http = self.http.clone();

        tokio::spawn(async move {
            if let Err(e) = http.post(&endpoint).json(&event).send().await {
                debug!(error = %e, "analytics post failed, ignoring");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_when_endpoint_empty() {
        assert!(!AnalyticsClient::new(None).enabled());
        assert!(!AnalyticsClient::new(Some(String::new())).enabled());
    }

    #[tokio::test]
    async fn record_blocked_does_not_panic_without_endpoint() {
        let client = AnalyticsClient::new(None);
        client.record_blocked("ads.example.com", "1.2.3.4", "AD_BLOCKED");
    }
}
