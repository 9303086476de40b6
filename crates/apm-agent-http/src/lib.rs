// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP intake transport for the APM agent.
//!
//! ```rust,ignore
//! let config = Config::from_env()?;
//! let transport = Arc::new(HttpTransport::new(&config)?);
//! let agent = Agent::builder(config, transport).build();
//! ```

#![deny(clippy::all)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod intake;
pub mod transport;

pub use intake::{IntakeClient, IntakeError};
pub use transport::HttpTransport;
