// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::capture::record::ErrorRecord;
use crate::error::TransportError;
use crate::traces::protocol::TransactionsPayload;

/// Delivers payloads to the intake.
///
/// Implementations must not retry on their own: a failed payload is
/// dropped by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_transactions(&self, payload: &TransactionsPayload) -> Result<(), TransportError>;

    async fn send_error(&self, record: &ErrorRecord) -> Result<(), TransportError>;
}
