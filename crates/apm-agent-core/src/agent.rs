// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capture::filters::Filters;
use crate::capture::record::{Capturable, CaptureContext, ErrorRecord};
use crate::capture::{build_record, CaptureOutcome};
use crate::config::Config;
use crate::error::TransportError;
use crate::event_bus::{emit, Event, PayloadKind};
use crate::instrumentation::context::Bound;
use crate::instrumentation::request::RequestContext;
use crate::instrumentation::trace::Trace;
use crate::instrumentation::transaction::Transaction;
use crate::instrumentation::{Instrumentation, TraceSettings};
use crate::traces::aggregator::TransactionQueue;
use crate::traces::flusher::TransactionFlusher;
use crate::transport::Transport;

/// Delivery of one captured error, see [`Agent::capture_error`].
pub type CaptureFuture<'a> = Pin<Box<dyn Future<Output = CaptureOutcome> + Send + 'a>>;

pub struct AgentBuilder {
    config: Config,
    transport: Arc<dyn Transport>,
    events: Option<Sender<Event>>,
}

impl AgentBuilder {
    /// Publishes internal events on `tx`, see [`crate::event_bus`].
    #[must_use]
    pub fn events(mut self, tx: Sender<Event>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn build(self) -> Arc<Agent> {
        let config = self.config;

        if !config.active {
            info!("APM agent is inactive due to configuration");
        } else if !config.is_enabled() {
            error!("APM agent isn't correctly configured: missing organization id, app id or secret token");
        } else {
            debug!(
                agent = crate::capture::AGENT_NAME,
                org = ?config.organization_id,
                app = ?config.app_id,
                "agent configured correctly"
            );
        }

        let queue = Arc::new(TransactionQueue::new(config.max_queue_size));
        let instrumentation = Instrumentation::new(queue.clone(), TraceSettings::from(&config));
        let flusher = TransactionFlusher::new(
            queue,
            self.transport.clone(),
            self.events.clone(),
            config.is_enabled(),
            config.flush_interval,
        );

        Arc::new(Agent {
            config,
            instrumentation,
            filters: RwLock::new(Filters::new()),
            transport: self.transport,
            events: self.events,
            flusher,
        })
    }
}

/// Entry point for instrumented code.
///
/// Owns the current transaction slot, the transaction queue and its
/// flusher, the error filters and the transport.
pub struct Agent {
    config: Config,
    instrumentation: Arc<Instrumentation>,
    filters: RwLock<Filters>,
    transport: Arc<dyn Transport>,
    events: Option<Sender<Event>>,
    flusher: TransactionFlusher,
}

impl Agent {
    pub fn builder(config: Config, transport: Arc<dyn Transport>) -> AgentBuilder {
        AgentBuilder {
            config,
            transport,
            events: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn instrumentation(&self) -> &Arc<Instrumentation> {
        &self.instrumentation
    }

    /// Whether data is sent at all.
    pub fn is_active(&self) -> bool {
        self.config.is_enabled()
    }

    pub fn start_transaction(&self, name: Option<&str>, kind: Option<&str>) -> Transaction {
        self.instrumentation.start_transaction(name, kind)
    }

    pub fn end_transaction(&self) {
        self.instrumentation.end_transaction();
    }

    pub fn set_transaction_name(&self, name: &str) {
        self.instrumentation.set_transaction_name(name);
    }

    pub fn build_trace(&self) -> Option<Trace> {
        self.instrumentation.build_trace()
    }

    pub fn current_transaction(&self) -> Option<Transaction> {
        self.instrumentation.current_transaction()
    }

    /// Starts a transaction for an inbound request unless the ignore rules
    /// match it. An ignored request leaves no current transaction behind.
    pub fn start_request_transaction(&self, request: RequestContext) -> Option<Transaction> {
        if self
            .config
            .ignore
            .is_ignored(&request.url, request.user_agent())
        {
            debug!(url = %request.url, "ignoring blacklisted request");
            self.instrumentation.set_current_transaction(None);
            return None;
        }

        let transaction = self.instrumentation.start_transaction(None, None);
        // a fresh transaction cannot have ended
        let _ = transaction.set_request(request);
        Some(transaction)
    }

    /// Aborts a request transaction whose client went away.
    ///
    /// When timeout detection is on and the request ran for longer than the
    /// threshold, an error is captured too.
    pub async fn request_aborted(&self, transaction: &Transaction) -> Option<CaptureOutcome> {
        if transaction.is_ended() {
            debug!(uuid = %transaction.uuid(), "request aborted after its transaction ended");
            return None;
        }

        let elapsed = transaction.elapsed();
        transaction.abort();

        let threshold = self.config.timeout_error_threshold;
        if !self.config.timeout || elapsed <= threshold {
            return None;
        }

        let message = format!(
            "Socket closed with active HTTP request (>{} sec)",
            threshold.as_secs_f64()
        );
        let abort_time = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let mut context = CaptureContext::default().with_extra("abortTime", abort_time);
        context.request = transaction.request();

        Some(self.capture_error(message, context).await)
    }

    pub fn bind<F, R>(&self, f: F) -> impl FnOnce() -> R
    where
        F: FnOnce() -> R,
    {
        self.instrumentation.bind(f)
    }

    pub fn bind_fn<A, R, F>(&self, f: F) -> impl Fn(A) -> R
    where
        F: Fn(A) -> R,
    {
        self.instrumentation.bind_fn(f)
    }

    pub fn bind_future<F: Future>(&self, future: F) -> Bound<F> {
        self.instrumentation.bind_future(future)
    }

    /// Appends a filter run on every captured error before it is sent.
    /// Returning `None` drops the error.
    pub fn add_filter<F>(&self, filter: F)
    where
        F: Fn(ErrorRecord) -> Option<ErrorRecord> + Send + Sync + 'static,
    {
        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(filter);
    }

    /// Captures an error or a message and sends it.
    ///
    /// The record, its stack and its request are taken when this is called,
    /// not when the returned future is first polled.
    pub fn capture_error(
        &self,
        input: impl Into<Capturable>,
        context: CaptureContext,
    ) -> CaptureFuture<'_> {
        let record = self.prepare(input.into(), context);
        Box::pin(async move {
            match record {
                Some(record) => self.deliver(record).await,
                None => CaptureOutcome::Filtered,
            }
        })
    }

    /// Fire-and-forget variant of [`Agent::capture_error`]. `callback`
    /// receives the outcome once delivery is done.
    pub fn capture_error_with<C>(
        self: &Arc<Self>,
        input: impl Into<Capturable>,
        context: CaptureContext,
        callback: C,
    ) where
        C: FnOnce(CaptureOutcome) + Send + 'static,
    {
        let Some(record) = self.prepare(input.into(), context) else {
            callback(CaptureOutcome::Filtered);
            return;
        };

        match Handle::try_current() {
            Ok(handle) => {
                let agent = Arc::clone(self);
                handle.spawn(async move {
                    callback(agent.deliver(record).await);
                });
            }
            Err(_) => {
                warn!("No async runtime available, error not sent");
                callback(CaptureOutcome::Failed(TransportError::Destination(
                    "no async runtime available".to_string(),
                )));
            }
        }
    }

    fn prepare(&self, input: Capturable, context: CaptureContext) -> Option<ErrorRecord> {
        let current = self.current_transaction();
        let record = build_record(input, context, current.as_ref(), &self.config);

        let filtered = self
            .filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .process(record);
        if filtered.is_none() {
            info!("Error not sent - ignored by filter");
        }
        filtered
    }

    async fn deliver(&self, record: ErrorRecord) -> CaptureOutcome {
        let uuid = record.uuid().unwrap_or_default().to_string();

        if !self.is_active() {
            debug!(%uuid, "Agent inactive, error not sent");
            return CaptureOutcome::Inactive;
        }

        match self.transport.send_error(&record).await {
            Ok(()) => {
                info!(%uuid, "Logged error successfully");
                emit(
                    self.events.as_ref(),
                    Event::ErrorLogged {
                        uuid: Uuid::parse_str(&uuid).ok(),
                    },
                );
                CaptureOutcome::Sent { uuid }
            }
            Err(e) => {
                error!(%uuid, "Could not deliver error: {e}");
                let status = match &e {
                    TransportError::Status { status, .. } => Some(*status),
                    _ => None,
                };
                emit(
                    self.events.as_ref(),
                    Event::TransportFailed {
                        payload: PayloadKind::Error,
                        status,
                    },
                );
                CaptureOutcome::Failed(e)
            }
        }
    }

    /// Sends every queued transaction now.
    pub async fn flush(&self) -> Result<usize, TransportError> {
        self.flusher.flush().await
    }

    /// Runs the periodic flusher until `cancel` fires.
    pub fn spawn_flusher(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let flusher = self.flusher.clone();
        tokio::spawn(async move { flusher.start(cancel).await })
    }

    /// Aborts the current transaction if it is still open, flushes the
    /// queue and tells event consumers to stop.
    pub async fn shutdown(&self) {
        if let Some(transaction) = self.current_transaction() {
            if !transaction.is_ended() {
                debug!(uuid = %transaction.uuid(), "aborting unfinished transaction on shutdown");
                transaction.abort();
            }
        }

        if let Err(e) = self.flush().await {
            warn!("Final flush failed: {e}");
        }
        emit(self.events.as_ref(), Event::Tombstone);
    }
}
