// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent setup shared by the integration tests

use apm_agent_core::{Agent, Config};
use std::sync::Arc;

use super::mocks::MockTransport;

/// Configuration with credentials, so the agent sends data
#[allow(dead_code)]
pub fn enabled_config() -> Config {
    Config {
        app_id: Some("app".to_string()),
        organization_id: Some("org".to_string()),
        secret_token: Some("secret".to_string()),
        hostname: "test-host".to_string(),
        capture_trace_stack_traces: false,
        ..Default::default()
    }
}

/// Agent wired to a fresh recording transport
#[allow(dead_code)]
pub fn agent_with(config: Config) -> (Arc<Agent>, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::default());
    let agent = Agent::builder(config, transport.clone()).build();
    (agent, transport)
}
