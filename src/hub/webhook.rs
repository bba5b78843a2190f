use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::error::RelayError;
use crate::proto::{WebhookRequest, WebhookResponse};

/// A TPA known to the relay: credential and webhook endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredApp {
    pub package_name: String,
    pub api_key: String,
    pub webhook_url: String,
}

/// HTTP client for TPA-facing webhooks (`session_request` / `stop_request`).
pub struct WebhookClient {
    http: reqwest::Client,
}

impl WebhookClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Asks a TPA to open a connection for a session.
    pub async fn session_request(
        &self,
        webhook_url: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<WebhookResponse, RelayError> {
        let request = WebhookRequest::SessionRequest {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
        };
        self.post(webhook_url, &request).await
    }

    /// Tells a TPA its session has been stopped.
    pub async fn stop_request(
        &self,
        webhook_url: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<WebhookResponse, RelayError> {
        let request = WebhookRequest::StopRequest {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
        };
        self.post(webhook_url, &request).await
    }

    async fn post(
        &self,
        webhook_url: &str,
        request: &WebhookRequest,
    ) -> Result<WebhookResponse, RelayError> {
        info!(webhook_url, "sending TPA webhook");
        let response = self
            .http
            .post(webhook_url)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<WebhookResponse>().await?)
    }
}

impl Default for WebhookClient {
    fn default() -> Self {
        Self::new()
    }
}
