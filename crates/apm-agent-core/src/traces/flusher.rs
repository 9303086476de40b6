// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::TransportError;
use crate::event_bus::{emit, Event, PayloadKind};
use crate::traces::aggregator::TransactionQueue;
use crate::transport::Transport;

/// Periodically sends the queued transactions.
///
/// A flush happens every `flush_interval`, whenever the queue fills up, and
/// once more on shutdown. Failed batches are dropped.
#[derive(Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct TransactionFlusher {
    queue: Arc<TransactionQueue>,
    transport: Arc<dyn Transport>,
    events: Option<Sender<Event>>,
    /// When false batches are taken from the queue and discarded
    enabled: bool,
    flush_interval: Duration,
}

impl TransactionFlusher {
    pub fn new(
        queue: Arc<TransactionQueue>,
        transport: Arc<dyn Transport>,
        events: Option<Sender<Event>>,
        enabled: bool,
        flush_interval: Duration,
    ) -> Self {
        TransactionFlusher {
            queue,
            transport,
            events,
            enabled,
            flush_interval,
        }
    }

    /// Runs until `cancel` fires, then flushes one last time.
    pub async fn start(&self, cancel: CancellationToken) {
        let mut flush_interval = interval(self.flush_interval);
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        flush_interval.tick().await; // discard first tick

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Final flush of queued transactions");
                    let _ = self.flush().await;
                    break;
                }
                _ = flush_interval.tick() => {
                    let _ = self.flush().await;
                }
                () = self.queue.full() => {
                    debug!("Transaction queue full, flushing early");
                    let _ = self.flush().await;
                    flush_interval.reset();
                }
            }
        }
    }

    /// Sends everything queued so far. Returns the number of transaction
    /// occurrences sent.
    pub async fn flush(&self) -> Result<usize, TransportError> {
        let Some(payload) = self.queue.flush() else {
            return Ok(0);
        };

        let transactions = payload.transaction_count();
        let traces = payload.trace_count();

        if !self.enabled {
            info!(transactions, "Agent inactive, dropping transactions");
            return Ok(0);
        }

        debug!(transactions, traces, "Flushing transactions");
        match self.transport.send_transactions(&payload).await {
            Ok(()) => {
                debug!(transactions, "Successfully flushed transactions");
                emit(
                    self.events.as_ref(),
                    Event::TransactionsFlushed {
                        transactions,
                        traces,
                    },
                );
                Ok(transactions)
            }
            Err(e) => {
                error!(transactions, "Error sending transactions: {e}");
                let status = match &e {
                    TransportError::Status { status, .. } => Some(*status),
                    _ => None,
                };
                emit(
                    self.events.as_ref(),
                    Event::TransportFailed {
                        payload: PayloadKind::Transactions,
                        status,
                    },
                );
                Err(e)
            }
        }
    }
}
