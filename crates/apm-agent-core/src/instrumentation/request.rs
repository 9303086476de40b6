// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use crate::capture::record::HttpContext;

const REDACTED: &str = "[REDACTED]";

/// The inbound request a transaction was started for.
///
/// Routing details are filled in by the web framework integration once the
/// request has been matched, and are used to name the transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub method: String,
    /// Path and query string as received
    pub url: String,
    /// Route pattern matched by the router, e.g. `/users/:id`
    pub route: Option<String>,
    /// Prefixes of the nested routers the request went through
    pub mount_stack: Vec<String>,
    /// Served by a static file handler
    pub static_file: bool,
    pub headers: BTreeMap<String, String>,
    pub remote_addr: Option<String>,
    pub body: Option<String>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    /// `"<METHOD> <route>"` from whatever routing information is known.
    pub fn default_transaction_name(&self) -> String {
        let path = if self.static_file {
            "static file".to_string()
        } else if let Some(route) = &self.route {
            let route = if route == "/" && !self.mount_stack.is_empty() {
                ""
            } else {
                route.as_str()
            };
            format!("{}{}", self.mount_stack.concat(), route)
        } else {
            self.mount_stack.concat()
        };

        if path.is_empty() {
            tracing::debug!(
                url = %self.url,
                route = self.route.is_some(),
                mount_stack = self.mount_stack.len(),
                "could not extract route name from request"
            );
            return format!("{} unknown route", self.method);
        }

        format!("{} {}", self.method, path)
    }

    pub fn to_http_context(&self, log_body: bool) -> HttpContext {
        let query_string = self
            .url
            .split_once('?')
            .map(|(_, query)| query.to_string())
            .filter(|query| !query.is_empty());

        HttpContext {
            method: self.method.clone(),
            url: self.url.clone(),
            query_string,
            headers: self.headers.clone(),
            user_agent: self.user_agent().map(str::to_string),
            remote_host: self.remote_addr.clone(),
            data: self.body.as_ref().map(|body| {
                if log_body {
                    body.clone()
                } else {
                    REDACTED.to_string()
                }
            }),
        }
    }
}
