//! Internal events reported by the agent to its owner.
//!
//! The transaction flusher and the error capture pipeline never surface
//! delivery problems to the instrumented application. Instead they publish
//! an [`Event`] on a bounded MPSC channel which the owner may consume:
//!
//! ```text
//! Producers               EventBus          Consumer (one)
//!     │                      │                   │
//!     ├─ TransactionsFlushed>│                   │
//!     ├─ TransportFailed ───>│ ──> MPSC ──────> rx
//!     └─ ErrorLogged ───────>│     channel       │
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let (mut event_bus, tx) = EventBus::run();
//! let agent = Agent::builder(config, transport).events(tx).build();
//!
//! while let Some(event) = event_bus.rx.recv().await {
//!     match event {
//!         Event::TransportFailed { payload, status } => { /* alert */ }
//!         Event::Tombstone => break,
//!         _ => {}
//!     }
//! }
//! ```

use tokio::sync::mpsc::{self, error::TrySendError, Sender};
use tracing::warn;
use uuid::Uuid;

use crate::event_bus::constants::MAX_EVENTS;

mod constants;

/// Which kind of payload an event refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadKind {
    Transactions,
    Error,
}

/// Events that can be sent through the event bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    /// A batch of transactions was accepted by the transport.
    TransactionsFlushed {
        /// Number of transaction occurrences in the batch
        transactions: usize,
        /// Number of trace occurrences in the batch
        traces: usize,
    },

    /// The transport rejected or failed to deliver a payload. The payload
    /// has been dropped.
    TransportFailed {
        payload: PayloadKind,
        /// HTTP status when the intake answered, `None` when unreachable
        status: Option<u16>,
    },

    /// An error record was accepted by the transport.
    ErrorLogged {
        /// `None` when the caller supplied a correlation id that is not a UUID
        uuid: Option<Uuid>,
    },

    /// Shutdown signal for the consumer.
    Tombstone,
}

/// Receiving side of the event bus, owned by the consumer.
#[allow(clippy::module_name_repetitions)]
pub struct EventBus {
    pub rx: mpsc::Receiver<Event>,
}

impl EventBus {
    /// Creates the bounded channel and returns the consumer side together
    /// with a sender that can be cloned for every producer.
    #[must_use]
    pub fn run() -> (EventBus, Sender<Event>) {
        let (tx, rx) = mpsc::channel(MAX_EVENTS);
        (EventBus { rx }, tx)
    }
}

/// Publishes `event` without ever waiting for the consumer.
pub(crate) fn emit(tx: Option<&Sender<Event>>, event: Event) {
    let Some(tx) = tx else {
        return;
    };

    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            warn!("Event bus full, dropping event {:?}", event);
        }
        Err(TrySendError::Closed(_)) => {}
    }
}
