// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use apm_agent_core::{Config, TransportError};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const USER_AGENT: &str = concat!("apm-agent-rust/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Missing credentials: {0} is not set")]
    MissingCredentials(&'static str),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Intake endpoints for one organization and app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeUrls {
    pub transactions: String,
    pub errors: String,
}

impl IntakeUrls {
    pub fn new(api_host: &str, organization_id: &str, app_id: &str) -> Self {
        let base = format!(
            "{}/api/v1/organizations/{organization_id}/apps/{app_id}",
            api_host.trim_end_matches('/')
        );
        IntakeUrls {
            transactions: format!("{base}/transactions/"),
            errors: format!("{base}/errors/"),
        }
    }
}

/// Builds a reqwest client with the agent's user agent and timeout.
/// Uses rustls TLS by default.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, IntakeError> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// Posts JSON payloads to the intake, authenticated with the secret token.
#[derive(Clone)]
pub struct IntakeClient {
    client: reqwest::Client,
    urls: IntakeUrls,
    secret_token: String,
}

impl std::fmt::Debug for IntakeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeClient")
            .field("urls", &self.urls)
            .finish_non_exhaustive()
    }
}

impl IntakeClient {
    pub fn new(config: &Config, timeout: Duration) -> Result<Self, IntakeError> {
        let organization_id = config
            .organization_id
            .as_deref()
            .ok_or(IntakeError::MissingCredentials("organization id"))?;
        let app_id = config
            .app_id
            .as_deref()
            .ok_or(IntakeError::MissingCredentials("app id"))?;
        let secret_token = config
            .secret_token
            .clone()
            .ok_or(IntakeError::MissingCredentials("secret token"))?;

        Ok(IntakeClient {
            client: build_client(timeout)?,
            urls: IntakeUrls::new(&config.api_host, organization_id, app_id),
            secret_token,
        })
    }

    pub fn urls(&self) -> &IntakeUrls {
        &self.urls
    }

    /// Sends `body` once. Any 2xx is a success; nothing is retried.
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<(), TransportError> {
        let body = serde_json::to_vec(body).map_err(|e| {
            error!("Failed to serialize payload: {e}");
            TransportError::Payload(e.to_string())
        })?;

        let start = Instant::now();
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.secret_token)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Destination(e.to_string()))?;
        let elapsed = start.elapsed();

        let status = response.status();
        if status.is_success() {
            debug!(
                "Successfully sent request in {} ms to {url}",
                elapsed.as_millis()
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
