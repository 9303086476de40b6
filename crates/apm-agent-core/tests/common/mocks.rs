// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock transport recording everything it is asked to send

use apm_agent_core::traces::protocol::TransactionsPayload;
use apm_agent_core::{ErrorRecord, Transport, TransportError};
use std::sync::Mutex;

#[derive(Default)]
pub struct MockTransport {
    pub payloads: Mutex<Vec<TransactionsPayload>>,
    pub errors: Mutex<Vec<ErrorRecord>>,
    /// Returned by every call when set
    pub fail_with: Mutex<Option<TransportError>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn failing(error: TransportError) -> Self {
        MockTransport {
            fail_with: Mutex::new(Some(error)),
            ..Default::default()
        }
    }

    pub fn payloads(&self) -> Vec<TransactionsPayload> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.errors.lock().unwrap().clone()
    }

    fn outcome(&self) -> Result<(), TransportError> {
        match self.fail_with.lock().unwrap().as_ref() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send_transactions(&self, payload: &TransactionsPayload) -> Result<(), TransportError> {
        self.payloads.lock().unwrap().push(payload.clone());
        self.outcome()
    }

    async fn send_error(&self, record: &ErrorRecord) -> Result<(), TransportError> {
        self.errors.lock().unwrap().push(record.clone());
        self.outcome()
    }
}
