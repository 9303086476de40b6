// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ended transactions waiting for the next flush, and the grouped wire
//! format they are flushed in.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::capture::stacktrace::StackFrame;

pub mod aggregator;
pub mod flusher;
pub mod protocol;

/// Immutable snapshot of a transaction taken when it ends.
///
/// Owns all the timing data the queue needs, so the live transaction can
/// be dropped as soon as it has been enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct EndedTransaction {
    pub uuid: Uuid,
    pub name: String,
    pub kind: String,
    pub result: u16,
    pub timestamp: DateTime<Utc>,
    /// Root trace duration in ms
    pub duration: f64,
    /// Recorded traces in end order, root trace included. Empty when the
    /// transaction lost its correlation.
    pub traces: Vec<EndedTrace>,
    pub extra: Map<String, Value>,
    pub user: Map<String, Value>,
    pub aborted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndedTrace {
    pub signature: String,
    pub kind: String,
    /// Offset from the root trace start, ms
    pub start_time: f64,
    pub duration: f64,
    /// Signatures from the root trace down to the immediate parent
    pub ancestors: Vec<String>,
    pub truncated: bool,
    pub extra: Map<String, Value>,
    pub frames: Vec<StackFrame>,
}

impl EndedTrace {
    /// Kind as reported on the wire. Truncated traces form their own group.
    pub fn wire_kind(&self) -> String {
        if self.truncated {
            format!("{}.truncated", self.kind)
        } else {
            self.kind.clone()
        }
    }
}
