// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # APM agent core
//!
//! Records how long units of work take in an application and reports them
//! in a compact, grouped form.
//!
//! ## Overview
//!
//! - A **transaction** is one unit of work, usually an inbound request.
//! - A **trace** is a timed operation within a transaction, e.g. a database
//!   query. Traces nest; every transaction has a root trace.
//! - The **current transaction** slot tells instrumentation which
//!   transaction new traces belong to. Asynchronous continuations must be
//!   bound to keep it right.
//! - Ended transactions are queued, grouped and flushed through a
//!   [`transport::Transport`].
//! - Errors and messages are captured independently, enriched with the
//!   current request, filtered and sent.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let agent = Agent::builder(Config::from_env()?, transport).build();
//! let _flusher = agent.spawn_flusher(cancel.clone());
//!
//! let txn = agent.start_transaction(Some("GET /users"), None);
//! if let Some(trace) = agent.build_trace() {
//!     trace.start("SELECT FROM users", "db.postgresql.query");
//!     // ...
//!     trace.end();
//! }
//! txn.end();
//! ```

#![deny(clippy::all)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![deny(unused_extern_crates)]
#![allow(clippy::module_name_repetitions)]

/// Agent facade owning the instrumentation, queue, filters and transport
pub mod agent;

/// Error capture pipeline
pub mod capture;

/// Configuration from `APM_*` environment variables
pub mod config;

pub mod error;

/// Internal events for the agent's owner
pub mod event_bus;

pub mod hostname;

/// Transactions, traces and the current transaction slot
pub mod instrumentation;

/// Logging infrastructure and tracing setup
pub mod logger;

/// Ended transaction queue, grouping and flushing
pub mod traces;

pub mod transport;

pub use agent::{Agent, AgentBuilder};
pub use capture::record::{Capturable, CaptureContext, ErrorRecord};
pub use capture::CaptureOutcome;
pub use config::Config;
pub use error::{ConfigError, TransactionError, TransportError};
pub use instrumentation::request::RequestContext;
pub use instrumentation::trace::Trace;
pub use instrumentation::transaction::Transaction;
pub use transport::Transport;
