// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;
use std::fmt;
use std::time::Instant;
use tracing::debug;

use crate::capture::stacktrace::{capture_frames, StackFrame};
use crate::instrumentation::transaction::{millis, SpanState, Transaction, ROOT};

const DEFAULT_KIND: &str = "custom.code";

/// A timed operation within a transaction, e.g. one database query.
///
/// Handle into the owning transaction's trace arena. Operating on a trace
/// in the wrong state (starting it twice, ending it before it started, ...)
/// is logged and ignored.
#[derive(Clone)]
pub struct Trace {
    transaction: Transaction,
    id: usize,
}

impl PartialEq for Trace {
    fn eq(&self, other: &Self) -> bool {
        self.transaction == other.transaction && self.id == other.id
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trace")
            .field("transaction", &self.transaction.uuid())
            .field("signature", &self.signature())
            .field("kind", &self.kind())
            .finish()
    }
}

impl Trace {
    pub(crate) fn new(transaction: Transaction, id: usize) -> Self {
        Trace { transaction, id }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT
    }

    pub fn signature(&self) -> String {
        self.transaction.state().spans[self.id].signature.clone()
    }

    pub fn kind(&self) -> String {
        self.transaction.state().spans[self.id].kind.clone()
    }

    pub fn is_started(&self) -> bool {
        self.transaction.state().spans[self.id].started
    }

    pub fn is_ended(&self) -> bool {
        self.transaction.state().spans[self.id].ended
    }

    pub fn is_truncated(&self) -> bool {
        self.transaction.state().spans[self.id].truncated
    }

    /// Starts the clock. An empty `kind` falls back to `"custom.code"`.
    ///
    /// Unless frames were attached with [`Trace::custom_stack_trace`], the
    /// current stack is captured first.
    pub fn start(&self, signature: &str, kind: &str) {
        let uuid = self.transaction.uuid();
        let settings = self.transaction.inner.settings;

        let needs_stack = {
            let state = self.transaction.state();
            if self.is_unstartable(&state.spans[self.id], state.ended) {
                return;
            }
            settings.capture_stack_traces && state.spans[self.id].frames.is_none()
        };

        // Captured without holding the transaction lock
        let frames = needs_stack.then(|| capture_frames(settings.stack_trace_limit));

        let mut state = self.transaction.state();
        if self.is_unstartable(&state.spans[self.id], state.ended) {
            return;
        }
        let span = &mut state.spans[self.id];
        span.started = true;
        if !signature.is_empty() {
            span.signature = signature.to_string();
        }
        if !kind.is_empty() {
            span.kind = kind.to_string();
        } else if span.kind.is_empty() {
            span.kind = DEFAULT_KIND.to_string();
        }
        if span.frames.is_none() {
            span.frames = frames;
        }
        span.start = Some(Instant::now());

        debug!(%uuid, signature = %span.signature, kind = %span.kind, "start trace");
    }

    fn is_unstartable(&self, span: &SpanState, ended: bool) -> bool {
        let uuid = self.transaction.uuid();
        if span.started {
            debug!(
                %uuid,
                signature = %span.signature,
                kind = %span.kind,
                "tried to call trace.start() on already started trace"
            );
            return true;
        }
        if ended {
            debug!(%uuid, "tried to call trace.start() after transaction ended");
            return true;
        }
        false
    }

    /// Stops the clock and records the trace into its transaction.
    pub fn end(&self) {
        self.finish(false);
    }

    /// Ends a started trace early, marking it as truncated.
    pub fn truncate(&self) {
        self.finish(true);
    }

    fn finish(&self, truncate: bool) {
        let uuid = self.transaction.uuid();
        let action = if truncate { "truncate" } else { "end" };

        let restore = {
            let mut state = self.transaction.state();
            let span = &mut state.spans[self.id];
            if !span.started {
                debug!(%uuid, signature = %span.signature, "tried to {action} non-started trace - ignoring");
                return;
            }
            if span.ended {
                debug!(
                    %uuid,
                    signature = %span.signature,
                    kind = %span.kind,
                    "tried to {action} already ended trace - ignoring"
                );
                return;
            }
            span.truncated |= truncate;
            state.end_span(uuid, self.id);
            self.id != ROOT && !state.ended
        };

        if restore {
            if let Some(instrumentation) = self.transaction.instrumentation() {
                instrumentation.correlator().restore(&self.transaction);
            }
        }
    }

    /// Duration in ms once both the trace and its transaction have ended.
    pub fn duration(&self) -> Option<f64> {
        let state = self.transaction.state();
        let span = &state.spans[self.id];
        if !span.ended || !state.ended {
            debug!(
                uuid = %self.transaction.uuid(),
                signature = %span.signature,
                "tried to call trace.duration() for un-ended trace/transaction"
            );
            return None;
        }
        span.elapsed.map(millis)
    }

    /// Offset from the root trace start in ms, once both the trace and its
    /// transaction have ended.
    pub fn start_time(&self) -> Option<f64> {
        let state = self.transaction.state();
        if !state.spans[self.id].ended || !state.ended {
            debug!(uuid = %self.transaction.uuid(), "tried to call trace.start_time() for un-ended trace/transaction");
            return None;
        }
        Some(millis(state.start_offset(self.id)))
    }

    /// Signatures from the root trace down to the parent, once both the
    /// trace and its transaction have ended.
    pub fn ancestors(&self) -> Option<Vec<String>> {
        let state = self.transaction.state();
        if !state.spans[self.id].ended || !state.ended {
            debug!(uuid = %self.transaction.uuid(), "tried to call trace.ancestors() for un-ended trace/transaction");
            return None;
        }
        Some(state.ancestors(self.id))
    }

    /// Attaches a value reported with the trace group, e.g. the full SQL.
    pub fn set_extra(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.transaction.state().spans[self.id]
            .extra
            .insert(key.into(), value.into());
    }

    /// Uses `frames` as the trace's stack instead of capturing one at start.
    pub fn custom_stack_trace(&self, frames: Vec<StackFrame>) {
        debug!(uuid = %self.transaction.uuid(), "applying custom stack trace to trace");
        self.transaction.state().spans[self.id].frames = Some(frames);
    }

    pub fn frames(&self) -> Option<Vec<StackFrame>> {
        self.transaction.state().spans[self.id].frames.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::{Instrumentation, TraceSettings};
    use crate::traces::aggregator::TransactionQueue;
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn instrumentation(capture_stack_traces: bool) -> Arc<Instrumentation> {
        Instrumentation::new(
            Arc::new(TransactionQueue::new(100)),
            TraceSettings {
                capture_stack_traces,
                stack_trace_limit: 20,
            },
        )
    }

    #[test]
    fn test_start_defaults_kind() {
        let ins = instrumentation(false);
        let txn = ins.start_transaction(None, None);
        let trace = txn.build_trace().unwrap();
        trace.start("work", "");
        assert_eq!(trace.kind(), "custom.code");
        assert!(trace.is_started());
    }

    #[test]
    #[traced_test]
    fn test_double_start_is_ignored() {
        let ins = instrumentation(false);
        let txn = ins.start_transaction(None, None);
        let trace = txn.build_trace().unwrap();
        trace.start("first", "db");
        let start = txn.state().spans[trace.id()].start;

        std::thread::sleep(Duration::from_millis(2));
        trace.start("second", "cache");

        assert_eq!(trace.signature(), "first");
        assert_eq!(trace.kind(), "db");
        assert_eq!(txn.state().spans[trace.id()].start, start);
        assert!(logs_contain("tried to call trace.start() on already started trace"));
    }

    #[test]
    fn test_start_after_transaction_end_is_ignored() {
        let ins = instrumentation(false);
        let txn = ins.start_transaction(None, None);
        let trace = txn.build_trace().unwrap();
        txn.end();
        trace.start("late", "db");
        assert!(!trace.is_started());
    }

    #[test]
    #[traced_test]
    fn test_end_unstarted_and_double_end_are_noops() {
        let ins = instrumentation(false);
        let txn = ins.start_transaction(None, None);
        let trace = txn.build_trace().unwrap();
        trace.end();
        assert!(!trace.is_ended());

        trace.start("q", "db");
        trace.end();
        trace.end();
        assert!(logs_contain("tried to end already ended trace"));

        txn.end();
        assert_eq!(txn.traces().len(), 1);
    }

    #[test]
    fn test_timing_only_available_after_transaction_end() {
        let ins = instrumentation(false);
        let txn = ins.start_transaction(None, None);
        let trace = txn.build_trace().unwrap();
        trace.start("q", "db");
        std::thread::sleep(Duration::from_millis(2));
        trace.end();

        assert!(trace.duration().is_none());
        assert!(trace.start_time().is_none());
        assert!(trace.ancestors().is_none());

        txn.end();
        let duration = trace.duration().unwrap();
        assert!(duration >= 0.0);
        assert!(duration <= txn.duration().unwrap());
        assert!(trace.start_time().unwrap() >= 0.0);
        assert_eq!(trace.ancestors().unwrap(), vec!["transaction".to_string()]);
        assert_eq!(txn.root_trace().start_time(), Some(0.0));
        assert_eq!(txn.root_trace().ancestors(), Some(Vec::new()));
    }

    #[test]
    fn test_nested_trace_ancestors() {
        let ins = instrumentation(false);
        let txn = ins.start_transaction(None, None);
        let render = txn.build_trace().unwrap();
        render.start("render", "template");
        let partial = txn.build_child_trace(&render).unwrap();
        partial.start("partial", "template");
        partial.end();
        render.end();
        txn.end();

        assert_eq!(
            partial.ancestors().unwrap(),
            vec!["transaction".to_string(), "render".to_string()]
        );
    }

    #[test]
    fn test_child_of_other_transaction_is_rejected() {
        let ins = instrumentation(false);
        let a = ins.start_transaction(None, None);
        let b = ins.start_transaction(None, None);
        let trace = a.build_trace().unwrap();
        assert!(b.build_child_trace(&trace).is_none());
    }

    #[test]
    fn test_truncate_requires_started_trace() {
        let ins = instrumentation(false);
        let txn = ins.start_transaction(None, None);
        let trace = txn.build_trace().unwrap();
        trace.truncate();
        assert!(!trace.is_truncated());

        trace.start("q", "db");
        trace.truncate();
        assert!(trace.is_truncated());
        assert!(trace.is_ended());
    }

    #[test]
    fn test_end_restores_owning_transaction() {
        let ins = instrumentation(false);
        let a = ins.start_transaction(Some("A"), None);
        let trace = a.build_trace().unwrap();
        trace.start("q", "db");
        let _b = ins.start_transaction(Some("B"), None);

        trace.end();
        assert_eq!(ins.current_transaction(), Some(a));
    }

    #[test]
    fn test_stack_capture() {
        let ins = instrumentation(true);
        let txn = ins.start_transaction(None, None);
        let captured = txn.build_trace().unwrap();
        captured.start("q", "db");
        assert!(captured.frames().is_some());

        let custom = txn.build_trace().unwrap();
        let frames = vec![StackFrame::new("app::handler", "/srv/app/src/handler.rs", Some(9))];
        custom.custom_stack_trace(frames.clone());
        custom.start("q", "db");
        assert_eq!(custom.frames(), Some(frames));

        let disabled = instrumentation(false);
        let txn = disabled.start_transaction(None, None);
        let trace = txn.build_trace().unwrap();
        trace.start("q", "db");
        assert!(trace.frames().is_none());
    }

    #[test]
    fn test_set_extra_is_reported() {
        let ins = instrumentation(false);
        let txn = ins.start_transaction(None, None);
        let trace = txn.build_trace().unwrap();
        trace.set_extra("sql", "SELECT * FROM users WHERE id = $1");
        trace.start("SELECT FROM users", "db.postgresql.query");
        trace.end();
        txn.end();

        let batch = ins.queue().take();
        assert_eq!(
            batch[0].traces[0].extra["sql"],
            serde_json::json!("SELECT * FROM users WHERE id = $1")
        );
    }
}
