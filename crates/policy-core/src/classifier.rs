//! Optional risk-classifier collaborator. Grounded on
//! `original_source/proxy/internal/classifier/client.go`: a pass-through
//! allow/0 when disabled, a POST+JSON decode otherwise, never fatal to the
//! policy decision.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyRequest {
    pub request_id: String,
    pub domain: String,
    #[serde(default)]
    pub numerical: Vec<f64>,
    #[serde(default)]
    pub categorical: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyResponse {
    pub request_id: String,
    pub score: f64,
    pub label: String,
    #[serde(default)]
    pub model_version: String,
}

impl ClassifyResponse {
    pub fn is_block(&self) -> bool {
        self.label.eq_ignore_ascii_case("block")
    }

    fn allow(request_id: String) -> Self {
        Self { request_id, score: 0.0, label: "allow".to_string(), model_version: String::new() }
    }
}

pub struct ClassifierClient {
    endpoint: Option<String>,
    http: reqwest::Client,
}

impl ClassifierClient {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint: endpoint.filter(|e| !e.is_empty()),
            http: reqwest::Client::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Runs under `deadline`; any error or timeout falls through to a
    /// pass-through allow response (non-fatal per SPEC_FULL §4.F step 5).
    pub async fn predict(&self, req: ClassifyRequest, deadline: Duration) -> ClassifyResponse {
        let Some(endpoint) = &self.endpoint else {
            return ClassifyResponse::allow(req.request_id);
        };

        let request_id = req.request_id.clone();
        let call = self.http.post(endpoint).json(&req).send();

        match tokio::time::timeout(deadline, call).await {
            Ok(Ok(resp)) => match resp.json::<ClassifyResponse>().await {
                Ok(parsed) => parsed,
                Err(_) => ClassifyResponse::allow(request_id),
            },
            _ => ClassifyResponse::allow(request_id),
        }
    }
}
