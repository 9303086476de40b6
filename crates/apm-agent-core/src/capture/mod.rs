// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error capture pipeline.
//!
//! Turns a native error or a message into an [`ErrorRecord`] enriched with
//! the stack, the current request and host details. Filtering and delivery
//! are driven by [`crate::agent::Agent`].

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::config::Config;
use crate::error::TransportError;
use crate::instrumentation::transaction::Transaction;

pub mod filters;
pub mod record;
pub mod stacktrace;

use record::{Capturable, CaptureContext, ErrorRecord, ExceptionInfo, Machine, Stacktrace};
use stacktrace::{capture_frames, find_culprit};

pub(crate) const AGENT_NAME: &str = concat!("apm-agent-rust/", env!("CARGO_PKG_VERSION"));
/// `rustc --version` of the compiler that built the agent.
pub(crate) const RUSTC_VERSION: &str = env!("APM_AGENT_RUSTC_VERSION");

/// What happened to a captured error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Accepted by the transport
    Sent { uuid: String },
    /// Vetoed by a filter, never sent
    Filtered,
    /// Recorded but not sent because the agent is inactive
    Inactive,
    Failed(TransportError),
}

/// Builds the record for `input`. Must run on the caller's side so the
/// captured stack and the current transaction are the caller's.
pub(crate) fn build_record(
    input: Capturable,
    context: CaptureContext,
    current: Option<&Transaction>,
    config: &Config,
) -> ErrorRecord {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let CaptureContext {
        request,
        mut extra,
        user,
        culprit,
        level,
    } = context;

    let http = request
        .or_else(|| current.and_then(Transaction::request))
        .map(|request| request.to_http_context(config.log_body));

    let uuid = match extra.get("uuid") {
        Some(Value::String(uuid)) if !uuid.is_empty() => uuid.clone(),
        _ => Uuid::new_v4().to_string(),
    };

    let (message, param_message, exception, mut frames, culprit) = match input {
        Capturable::Message {
            message,
            param_message,
        } => {
            error!(%uuid, "{message}");
            // agent frames are already skipped, the caller is first
            let frames = capture_frames(config.stack_trace_limit);
            (message, param_message, None, frames, culprit)
        }
        Capturable::Exception {
            type_name,
            value,
            module,
            frames,
            uncaught,
        } => {
            let message = format!("{type_name}: {value}");
            error!(%uuid, uncaught, "logging error: {message}");

            let mut frames = frames.unwrap_or_else(|| capture_frames(config.stack_trace_limit));
            if config.capture_frame && !uncaught && !frames.iter().any(|frame| frame.in_app) {
                // point at the capture call site to make async errors traceable
                if let Some(caller) = capture_frames(1).into_iter().next() {
                    frames.insert(0, caller);
                }
            }
            let culprit = culprit.or_else(|| find_culprit(&frames));

            let exception = ExceptionInfo {
                kind: type_name,
                value,
                module,
                uncaught,
            };
            (message, None, Some(exception), frames, culprit)
        }
    };

    // intake expects the outermost frame first
    frames.reverse();

    extra.insert("uuid".to_string(), Value::String(uuid));
    extra.insert("agent".to_string(), Value::String(AGENT_NAME.to_string()));
    extra.insert("rustc".to_string(), Value::String(RUSTC_VERSION.to_string()));
    extra.insert(
        "os".to_string(),
        Value::String(std::env::consts::OS.to_string()),
    );

    ErrorRecord {
        message,
        param_message,
        exception,
        stacktrace: (!frames.is_empty()).then_some(Stacktrace { frames }),
        culprit,
        http,
        user,
        extra,
        machine: Machine {
            hostname: config.hostname.clone(),
        },
        timestamp,
        level: level.unwrap_or(config.exception_log_level),
    }
}
