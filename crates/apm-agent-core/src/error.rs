// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use uuid::Uuid;

/// Errors raised while building or validating the agent configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid ignore pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Returned by the guarded transaction setters once the transaction has ended.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("Transaction {0} has already ended")]
    AlreadyEnded(Uuid),
}

/// Failures reported by a [`crate::transport::Transport`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to prepare payload: {0}")]
    Payload(String),

    #[error("Intake responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Error shipping data: {0}")]
    Destination(String),
}
