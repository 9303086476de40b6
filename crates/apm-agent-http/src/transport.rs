// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use apm_agent_core::traces::protocol::TransactionsPayload;
use apm_agent_core::{Config, ErrorRecord, Transport, TransportError};
use async_trait::async_trait;
use std::time::Duration;

use crate::intake::{IntakeClient, IntakeError, DEFAULT_TIMEOUT};

/// [`Transport`] posting to the HTTP intake.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: IntakeClient,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, IntakeError> {
        Self::with_timeout(config, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(config: &Config, timeout: Duration) -> Result<Self, IntakeError> {
        Ok(HttpTransport {
            client: IntakeClient::new(config, timeout)?,
        })
    }

    pub fn client(&self) -> &IntakeClient {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_transactions(&self, payload: &TransactionsPayload) -> Result<(), TransportError> {
        self.client
            .post(&self.client.urls().transactions, payload)
            .await
    }

    async fn send_error(&self, record: &ErrorRecord) -> Result<(), TransportError> {
        self.client.post(&self.client.urls().errors, record).await
    }
}
