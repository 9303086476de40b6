// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::traces::protocol::{self, TransactionsPayload};
use crate::traces::EndedTransaction;

/// Full batches the buffer holds before the oldest transactions are dropped.
pub const MAX_PENDING_BATCHES: usize = 10;

/// Takes in ended transactions and hands them out in batches to be flushed.
///
/// Producers never wait: `enqueue` only takes the buffer lock for a push.
/// Once the buffer holds `max_queue_size` transactions the flusher is woken
/// up early. Without a flusher nothing drains the buffer: past
/// `MAX_PENDING_BATCHES` full batches the oldest transactions are dropped.
#[derive(Debug)]
pub struct TransactionQueue {
    buffer: Mutex<VecDeque<EndedTransaction>>,
    max_queue_size: usize,
    notify: Notify,
}

impl TransactionQueue {
    pub fn new(max_queue_size: usize) -> Self {
        TransactionQueue {
            buffer: Mutex::new(VecDeque::with_capacity(max_queue_size)),
            max_queue_size,
            notify: Notify::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.max_queue_size.max(1) * MAX_PENDING_BATCHES
    }

    pub fn enqueue(&self, transaction: EndedTransaction) {
        let (len, dropped) = {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            let dropped = if buffer.len() >= self.capacity() {
                buffer.pop_front()
            } else {
                None
            };
            buffer.push_back(transaction);
            (buffer.len(), dropped)
        };

        if let Some(dropped) = dropped {
            warn!(
                uuid = %dropped.uuid,
                transaction = %dropped.name,
                "Transaction queue is not being flushed, dropping oldest transaction"
            );
        }

        if len >= self.max_queue_size {
            debug!(len, "transaction queue full, waking flusher");
            self.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the whole buffer, leaving it empty.
    pub fn take(&self) -> Vec<EndedTransaction> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner)).into()
    }

    /// Takes the buffer and groups it into one payload. `None` when there is
    /// nothing to send.
    pub fn flush(&self) -> Option<TransactionsPayload> {
        let batch = self.take();
        if batch.is_empty() {
            return None;
        }
        debug!(transactions = batch.len(), "encoding transaction batch");
        Some(protocol::encode(&batch))
    }

    pub fn clear(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Resolves once the buffer has reached `max_queue_size`.
    pub async fn full(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_test::traced_test;
    use uuid::Uuid;

    fn ended(name: &str) -> EndedTransaction {
        EndedTransaction {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            kind: "request".to_string(),
            result: 200,
            timestamp: Utc::now(),
            duration: 1.0,
            traces: Vec::new(),
            extra: Map::new(),
            user: Map::new(),
            aborted: false,
        }
    }

    #[test]
    fn test_take_empties_the_buffer() {
        let queue = TransactionQueue::new(10);
        queue.enqueue(ended("a"));
        queue.enqueue(ended("b"));
        assert_eq!(queue.len(), 2);

        let batch = queue.take();
        assert_eq!(batch.len(), 2);
        assert!(queue.is_empty());
        assert!(queue.take().is_empty());
    }

    #[test]
    fn test_flush_empty_queue() {
        let queue = TransactionQueue::new(10);
        assert!(queue.flush().is_none());
    }

    #[test]
    fn test_flush_encodes_batch() {
        let queue = TransactionQueue::new(10);
        queue.enqueue(ended("a"));
        queue.enqueue(ended("a"));

        let payload = queue.flush().unwrap();
        assert_eq!(payload.transactions.len(), 1);
        assert_eq!(payload.transaction_count(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear() {
        let queue = TransactionQueue::new(10);
        queue.enqueue(ended("a"));
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_unflushed_queue_drops_oldest() {
        let queue = TransactionQueue::new(2);
        let capacity = 2 * MAX_PENDING_BATCHES;
        for i in 0..capacity + 5 {
            queue.enqueue(ended(&format!("t{i}")));
        }

        assert_eq!(queue.len(), capacity);
        let batch = queue.take();
        assert_eq!(batch[0].name, "t5");
        assert_eq!(batch[capacity - 1].name, format!("t{}", capacity + 4));
        assert!(logs_contain("dropping oldest transaction"));
    }

    #[tokio::test]
    async fn test_full_wakes_at_max_queue_size() {
        let queue = Arc::new(TransactionQueue::new(2));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.full().await })
        };

        queue.enqueue(ended("a"));
        queue.enqueue(ended("b"));

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("flusher should be woken")
            .unwrap();
    }
}
