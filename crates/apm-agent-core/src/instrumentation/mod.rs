// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transaction and trace engine.
//!
//! Collaborators report work through this API: start a transaction, build
//! and time traces within it, end it. Ended transactions are snapshotted
//! into the [`TransactionQueue`].

use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::config::{Config, DEFAULT_STACK_TRACE_LIMIT};
use crate::traces::aggregator::TransactionQueue;

pub mod context;
pub mod request;
pub mod trace;
pub mod transaction;

use context::{Bound, Correlator};
use trace::Trace;
use transaction::Transaction;

/// How traces capture their call site when they start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceSettings {
    pub capture_stack_traces: bool,
    pub stack_trace_limit: usize,
}

impl Default for TraceSettings {
    fn default() -> Self {
        TraceSettings {
            capture_stack_traces: true,
            stack_trace_limit: DEFAULT_STACK_TRACE_LIMIT,
        }
    }
}

impl From<&Config> for TraceSettings {
    fn from(config: &Config) -> Self {
        TraceSettings {
            capture_stack_traces: config.capture_trace_stack_traces,
            stack_trace_limit: config.stack_trace_limit,
        }
    }
}

#[derive(Debug)]
pub struct Instrumentation {
    correlator: Correlator,
    queue: Arc<TransactionQueue>,
    settings: TraceSettings,
}

impl Instrumentation {
    pub fn new(queue: Arc<TransactionQueue>, settings: TraceSettings) -> Arc<Self> {
        Arc::new(Instrumentation {
            correlator: Correlator::new(),
            queue,
            settings,
        })
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn queue(&self) -> &Arc<TransactionQueue> {
        &self.queue
    }

    /// Creates a transaction and makes it the current one.
    pub fn start_transaction(self: &Arc<Self>, name: Option<&str>, kind: Option<&str>) -> Transaction {
        let transaction = Transaction::new(Arc::downgrade(self), self.settings, name, kind);
        self.correlator.set(Some(transaction.clone()));
        transaction
    }

    pub fn current_transaction(&self) -> Option<Transaction> {
        self.correlator.current()
    }

    pub fn set_current_transaction(&self, transaction: Option<Transaction>) {
        self.correlator.set(transaction);
    }

    /// Ends the current transaction, if any.
    pub fn end_transaction(&self) {
        match self.current_transaction() {
            Some(transaction) => transaction.end(),
            None => debug!("cannot end transaction - no active transaction found"),
        }
    }

    /// Names the current transaction, if any.
    pub fn set_transaction_name(&self, name: &str) {
        let Some(transaction) = self.current_transaction() else {
            debug!("no active transaction found - cannot set name");
            return;
        };
        // already logged by the setter
        let _ = transaction.set_name(name);
    }

    /// Builds a trace in the current transaction. `None` when there is no
    /// current transaction or it has ended.
    pub fn build_trace(&self) -> Option<Trace> {
        match self.current_transaction() {
            Some(transaction) => transaction.build_trace(),
            None => {
                debug!("no active transaction found - cannot build new trace");
                None
            }
        }
    }

    pub fn bind<F, R>(&self, f: F) -> impl FnOnce() -> R
    where
        F: FnOnce() -> R,
    {
        self.correlator.bind(f)
    }

    pub fn bind_fn<A, R, F>(&self, f: F) -> impl Fn(A) -> R
    where
        F: Fn(A) -> R,
    {
        self.correlator.bind_fn(f)
    }

    pub fn bind_future<F: Future>(&self, future: F) -> Bound<F> {
        self.correlator.bind_future(future)
    }
}
