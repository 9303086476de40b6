// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::capture::stacktrace::StackFrame;
use crate::error::TransactionError;
use crate::instrumentation::request::RequestContext;
use crate::instrumentation::trace::Trace;
use crate::instrumentation::{Instrumentation, TraceSettings};
use crate::traces::{EndedTrace, EndedTransaction};

/// Index of the root trace in a transaction's trace arena.
pub(crate) const ROOT: usize = 0;
pub(crate) const ROOT_SIGNATURE: &str = "transaction";
const DEFAULT_KIND: &str = "request";
const DEFAULT_RESULT: u16 = 200;

/// Timing state of one trace, owned by its transaction.
#[derive(Debug)]
pub(crate) struct SpanState {
    pub(crate) parent: Option<usize>,
    pub(crate) signature: String,
    pub(crate) kind: String,
    pub(crate) started: bool,
    pub(crate) ended: bool,
    pub(crate) truncated: bool,
    pub(crate) start: Option<Instant>,
    pub(crate) elapsed: Option<Duration>,
    pub(crate) extra: Map<String, Value>,
    pub(crate) frames: Option<Vec<StackFrame>>,
}

impl SpanState {
    fn new(parent: Option<usize>) -> Self {
        SpanState {
            parent,
            signature: String::new(),
            kind: String::new(),
            started: false,
            ended: false,
            truncated: false,
            start: None,
            elapsed: None,
            extra: Map::new(),
            frames: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct TransactionState {
    custom_name: Option<String>,
    default_name: Option<String>,
    kind: String,
    result: u16,
    request: Option<RequestContext>,
    user: Map<String, Value>,
    extra: Map<String, Value>,
    pub(crate) ended: bool,
    aborted: bool,
    abort_time: Option<Duration>,
    timestamp: DateTime<Utc>,
    /// Trace arena, the root trace lives at [`ROOT`]
    pub(crate) spans: Vec<SpanState>,
    /// Traces handed out by `build_trace`, in build order
    built: Vec<usize>,
    /// Traces that ended while the transaction was open, in end order
    recorded: Vec<usize>,
}

impl TransactionState {
    fn effective_name(&self) -> String {
        if let Some(name) = self.custom_name.as_ref().filter(|n| !n.is_empty()) {
            return name.clone();
        }
        if let Some(name) = self.default_name.as_ref().filter(|n| !n.is_empty()) {
            return name.clone();
        }
        match &self.request {
            Some(request) => format!("{} unknown route (unnamed)", request.method),
            None => "unnamed".to_string(),
        }
    }

    /// Stops the clock of a started trace and records it unless the
    /// transaction has already ended.
    pub(crate) fn end_span(&mut self, uuid: Uuid, id: usize) {
        let ended = self.ended;
        let span = &mut self.spans[id];
        span.elapsed = Some(span.start.map(|s| s.elapsed()).unwrap_or_default());
        span.ended = true;
        debug!(%uuid, signature = %span.signature, kind = %span.kind, "ended trace");

        if ended {
            debug!(
                %uuid,
                signature = %span.signature,
                "can't record ended trace after parent transaction has ended, ignoring"
            );
            return;
        }
        self.recorded.push(id);
    }

    /// Offset of a trace's start from the root trace start.
    pub(crate) fn start_offset(&self, id: usize) -> Duration {
        match (self.spans[id].start, self.spans[ROOT].start) {
            (Some(start), Some(root)) => start.saturating_duration_since(root),
            _ => Duration::ZERO,
        }
    }

    /// Signatures from the root trace down to the trace's parent.
    pub(crate) fn ancestors(&self, id: usize) -> Vec<String> {
        let mut ancestors = Vec::new();
        let mut parent = self.spans[id].parent;
        while let Some(p) = parent {
            ancestors.push(self.spans[p].signature.clone());
            parent = self.spans[p].parent;
        }
        ancestors.reverse();
        ancestors
    }

    fn ended_trace(&self, id: usize) -> EndedTrace {
        let span = &self.spans[id];
        EndedTrace {
            signature: span.signature.clone(),
            kind: span.kind.clone(),
            start_time: millis(self.start_offset(id)),
            duration: millis(span.elapsed.unwrap_or_default()),
            ancestors: self.ancestors(id),
            truncated: span.truncated,
            extra: span.extra.clone(),
            frames: span.frames.clone().unwrap_or_default(),
        }
    }
}

pub(crate) fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1e3
}

pub(crate) struct TransactionInner {
    uuid: Uuid,
    instrumentation: Weak<Instrumentation>,
    pub(crate) settings: TraceSettings,
    state: Mutex<TransactionState>,
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.ended {
            debug!(
                uuid = %self.uuid,
                name = %state.effective_name(),
                "transaction dropped without being ended, discarding"
            );
        }
    }
}

/// Root unit of work, usually one inbound request.
///
/// A cheap handle: clones refer to the same transaction. Every transaction
/// owns a root trace spanning its whole lifetime.
#[derive(Clone)]
pub struct Transaction {
    pub(crate) inner: Arc<TransactionInner>,
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("uuid", &self.inner.uuid)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(
        instrumentation: Weak<Instrumentation>,
        settings: TraceSettings,
        name: Option<&str>,
        kind: Option<&str>,
    ) -> Self {
        let mut root = SpanState::new(None);
        root.signature = ROOT_SIGNATURE.to_string();
        root.kind = ROOT_SIGNATURE.to_string();
        root.started = true;
        root.start = Some(Instant::now());

        let uuid = Uuid::new_v4();
        let kind = kind.filter(|k| !k.is_empty()).unwrap_or(DEFAULT_KIND);
        debug!(%uuid, name = ?name, kind, "start transaction");

        Transaction {
            inner: Arc::new(TransactionInner {
                uuid,
                instrumentation,
                settings,
                state: Mutex::new(TransactionState {
                    custom_name: None,
                    default_name: name.filter(|n| !n.is_empty()).map(str::to_string),
                    kind: kind.to_string(),
                    result: DEFAULT_RESULT,
                    request: None,
                    user: Map::new(),
                    extra: Map::new(),
                    ended: false,
                    aborted: false,
                    abort_time: None,
                    timestamp: Utc::now(),
                    spans: vec![root],
                    built: Vec::new(),
                    recorded: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, TransactionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn instrumentation(&self) -> Option<Arc<Instrumentation>> {
        self.inner.instrumentation.upgrade()
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    /// Explicit name, else default name, else a fallback derived from the
    /// request method, else `"unnamed"`.
    pub fn name(&self) -> String {
        self.state().effective_name()
    }

    pub fn kind(&self) -> String {
        self.state().kind.clone()
    }

    pub fn result(&self) -> u16 {
        self.state().result
    }

    pub fn is_ended(&self) -> bool {
        self.state().ended
    }

    pub fn is_aborted(&self) -> bool {
        self.state().aborted
    }

    /// Time between start and abort for an aborted transaction.
    pub fn abort_time(&self) -> Option<Duration> {
        self.state().abort_time
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.state().timestamp
    }

    pub fn request(&self) -> Option<RequestContext> {
        self.state().request.clone()
    }

    /// Time since the transaction started.
    pub fn elapsed(&self) -> Duration {
        self.state().spans[ROOT]
            .start
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    /// Root trace duration in ms, `None` until ended.
    pub fn duration(&self) -> Option<f64> {
        self.root_trace().duration()
    }

    pub fn root_trace(&self) -> Trace {
        Trace::new(self.clone(), ROOT)
    }

    /// Traces recorded so far, in the order they ended. The root trace is not
    /// included.
    pub fn traces(&self) -> Vec<Trace> {
        self.state()
            .recorded
            .iter()
            .filter(|id| **id != ROOT)
            .map(|id| Trace::new(self.clone(), *id))
            .collect()
    }

    fn guard(&self, state: &TransactionState, field: &str) -> Result<(), TransactionError> {
        if state.ended {
            debug!(uuid = %self.uuid(), "tried to set transaction.{field} on already ended transaction");
            return Err(TransactionError::AlreadyEnded(self.uuid()));
        }
        Ok(())
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<(), TransactionError> {
        let mut state = self.state();
        self.guard(&state, "name")?;
        let name = name.into();
        debug!(uuid = %self.uuid(), %name, "setting transaction name");
        state.custom_name = Some(name);
        Ok(())
    }

    /// Name used when no explicit name is set. Usually set by a framework
    /// integration from the matched route.
    pub fn set_default_name(&self, name: impl Into<String>) {
        let name = name.into();
        debug!(uuid = %self.uuid(), %name, "setting default transaction name");
        self.state().default_name = Some(name);
    }

    pub fn set_result(&self, result: u16) -> Result<(), TransactionError> {
        let mut state = self.state();
        self.guard(&state, "result")?;
        debug!(uuid = %self.uuid(), result, "setting transaction result");
        state.result = result;
        Ok(())
    }

    pub fn set_request(&self, request: RequestContext) -> Result<(), TransactionError> {
        let mut state = self.state();
        self.guard(&state, "request")?;
        state.request = Some(request);
        Ok(())
    }

    /// Merges `user` into the user context.
    pub fn set_user_context(&self, user: Map<String, Value>) -> Result<(), TransactionError> {
        let mut state = self.state();
        self.guard(&state, "user")?;
        state.user.extend(user);
        Ok(())
    }

    /// Merges `extra` into the extra context.
    pub fn set_extra_context(&self, extra: Map<String, Value>) -> Result<(), TransactionError> {
        let mut state = self.state();
        self.guard(&state, "extra")?;
        state.extra.extend(extra);
        Ok(())
    }

    /// New unstarted trace parented to the root trace, `None` once the
    /// transaction has ended.
    pub fn build_trace(&self) -> Option<Trace> {
        self.build_span(ROOT)
    }

    /// New unstarted trace nested under `parent`.
    pub fn build_child_trace(&self, parent: &Trace) -> Option<Trace> {
        if parent.transaction() != self {
            debug!(uuid = %self.uuid(), "parent trace belongs to another transaction");
            return None;
        }
        self.build_span(parent.id())
    }

    fn build_span(&self, parent: usize) -> Option<Trace> {
        let id = {
            let mut state = self.state();
            if state.ended {
                debug!(uuid = %self.uuid(), "transaction already ended - cannot build new trace");
                return None;
            }
            let id = state.spans.len();
            state.spans.push(SpanState::new(Some(parent)));
            state.built.push(id);
            id
        };
        debug!(uuid = %self.uuid(), "init trace");
        Some(Trace::new(self.clone(), id))
    }

    /// Ends the transaction and hands it to the queue.
    ///
    /// Open traces are truncated. When the current transaction is not this
    /// one the recorded traces are discarded: they can no longer be trusted
    /// to belong here.
    pub fn end(&self) {
        self.finish(false);
    }

    /// Ends the transaction because its work was interrupted, e.g. the client
    /// went away mid-request.
    pub fn abort(&self) {
        self.finish(true);
    }

    fn finish(&self, aborted: bool) {
        let uuid = self.uuid();
        let instrumentation = self.instrumentation();

        let truncated = {
            let mut state = self.state();
            if state.ended {
                debug!(%uuid, "tried to call transaction.end() on already ended transaction");
                return;
            }

            if state.default_name.is_none() {
                let from_request = state
                    .request
                    .as_ref()
                    .map(RequestContext::default_transaction_name);
                if let Some(name) = from_request {
                    debug!(%uuid, %name, "setting default transaction name");
                    state.default_name = Some(name);
                }
            }

            let open: Vec<usize> = state
                .built
                .iter()
                .copied()
                .filter(|id| state.spans[*id].started && !state.spans[*id].ended)
                .collect();
            for id in &open {
                state.spans[*id].truncated = true;
                state.end_span(uuid, *id);
            }

            state.end_span(uuid, ROOT);
            state.ended = true;
            if aborted {
                state.aborted = true;
                state.abort_time = state.spans[ROOT].elapsed;
            }
            !open.is_empty()
        };

        let Some(instrumentation) = instrumentation else {
            debug!(%uuid, "instrumentation is gone, dropping ended transaction");
            return;
        };
        let correlator = instrumentation.correlator();
        if truncated {
            correlator.restore(self);
        }

        let current = correlator.current();
        let mut state = self.state();
        match current {
            None => {
                warn!(%uuid, traces = state.recorded.len(), "no current transaction found");
                state.recorded.clear();
            }
            Some(other) if other != *self => {
                warn!(
                    %uuid,
                    other = %other.uuid(),
                    traces = state.recorded.len(),
                    "transaction is out of sync"
                );
                state.recorded.clear();
            }
            Some(_) => {}
        }

        let ended = EndedTransaction {
            uuid,
            name: state.effective_name(),
            kind: state.kind.clone(),
            result: state.result,
            timestamp: state.timestamp,
            duration: millis(state.spans[ROOT].elapsed.unwrap_or_default()),
            traces: state.recorded.iter().map(|id| state.ended_trace(*id)).collect(),
            extra: state.extra.clone(),
            user: state.user.clone(),
            aborted: state.aborted,
        };
        drop(state);

        debug!(
            %uuid,
            name = %ended.name,
            kind = %ended.kind,
            result = ended.result,
            aborted,
            "ended transaction"
        );
        instrumentation.queue().enqueue(ended);
    }
}
