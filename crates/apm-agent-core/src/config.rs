// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::hostname::get_hostname;

pub const DEFAULT_API_HOST: &str = "https://intake.apm-agent.io";
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
pub const DEFAULT_STACK_TRACE_LIMIT: usize = 50;
pub const DEFAULT_TIMEOUT_ERROR_THRESHOLD: Duration = Duration::from_millis(25_000);

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Severity attached to captured error records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl ErrorLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "fatal" => Some(Self::Fatal),
            _ => None,
        }
    }
}

/// Inbound requests matching any of these rules never get a transaction.
///
/// URLs match exactly or by pattern; user agents match by prefix or by
/// pattern.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    pub urls: Vec<String>,
    pub url_patterns: Vec<Regex>,
    pub user_agents: Vec<String>,
    pub user_agent_patterns: Vec<Regex>,
}

impl IgnoreRules {
    /// Parses comma separated lists. Entries written as `/.../` are
    /// compiled as regular expressions, anything else is taken literally.
    pub fn parse(urls: &str, user_agents: &str) -> Result<Self, ConfigError> {
        let (urls, url_patterns) = split_rules(urls)?;
        let (user_agents, user_agent_patterns) = split_rules(user_agents)?;
        Ok(Self {
            urls,
            url_patterns,
            user_agents,
            user_agent_patterns,
        })
    }

    pub fn is_ignored(&self, url: &str, user_agent: Option<&str>) -> bool {
        if self.urls.iter().any(|ignored| ignored == url) {
            return true;
        }
        if self.url_patterns.iter().any(|re| re.is_match(url)) {
            return true;
        }

        let Some(ua) = user_agent else {
            return false;
        };
        self.user_agents.iter().any(|prefix| ua.starts_with(prefix.as_str()))
            || self.user_agent_patterns.iter().any(|re| re.is_match(ua))
    }
}

fn split_rules(raw: &str) -> Result<(Vec<String>, Vec<Regex>), ConfigError> {
    let mut literals = Vec::new();
    let mut patterns = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(pattern) if !pattern.is_empty() => {
                let re = Regex::new(pattern).map_err(|source| ConfigError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
                patterns.push(re);
            }
            _ => literals.push(entry.to_string()),
        }
    }

    Ok((literals, patterns))
}

#[derive(Debug, Clone)]
pub struct Config {
    pub app_id: Option<String>,
    pub organization_id: Option<String>,
    pub secret_token: Option<String>,
    /// Set to false to record data without ever sending it
    pub active: bool,
    pub hostname: String,
    /// Log level for the agent's own diagnostics
    pub log_level: String,
    /// Maximum number of stack frames kept per captured stack
    pub stack_trace_limit: usize,
    /// Capture a stack snapshot every time a trace starts
    pub capture_trace_stack_traces: bool,
    pub exception_log_level: ErrorLevel,
    /// Report requests whose socket closed while the transaction was open
    pub timeout: bool,
    pub timeout_error_threshold: Duration,
    /// Include request bodies in the `http` section of error records
    pub log_body: bool,
    pub ignore: IgnoreRules,
    /// Prepend the caller of `capture_error` when no frame is in-app
    pub capture_frame: bool,
    /// How often the queue is flushed
    pub flush_interval: Duration,
    /// Number of ended transactions that triggers an early flush
    pub max_queue_size: usize,
    pub api_host: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_id: None,
            organization_id: None,
            secret_token: None,
            active: true,
            hostname: get_hostname(),
            log_level: "info".to_string(),
            stack_trace_limit: DEFAULT_STACK_TRACE_LIMIT,
            capture_trace_stack_traces: true,
            exception_log_level: ErrorLevel::Error,
            timeout: true,
            timeout_error_threshold: DEFAULT_TIMEOUT_ERROR_THRESHOLD,
            log_body: false,
            ignore: IgnoreRules::default(),
            capture_frame: false,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            api_host: DEFAULT_API_HOST.to_string(),
        }
    }
}

impl Config {
    /// Create configuration from `APM_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ignore = IgnoreRules::parse(
            &env::var("APM_IGNORE_URLS").unwrap_or_default(),
            &env::var("APM_IGNORE_USER_AGENTS").unwrap_or_default(),
        )?;

        let exception_log_level = match env::var("APM_EXCEPTION_LOG_LEVEL") {
            Ok(level) => ErrorLevel::parse(&level).ok_or_else(|| {
                ConfigError::Invalid(format!("Invalid exception log level '{level}'"))
            })?,
            Err(_) => defaults.exception_log_level,
        };

        let config = Self {
            app_id: non_empty_var("APM_APP_ID"),
            organization_id: non_empty_var("APM_ORGANIZATION_ID"),
            secret_token: non_empty_var("APM_SECRET_TOKEN"),
            active: bool_var("APM_ACTIVE", defaults.active),
            hostname: defaults.hostname,
            log_level: env::var("APM_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
            stack_trace_limit: parsed_var("APM_STACK_TRACE_LIMIT")
                .unwrap_or(defaults.stack_trace_limit),
            capture_trace_stack_traces: bool_var(
                "APM_CAPTURE_TRACE_STACK_TRACES",
                defaults.capture_trace_stack_traces,
            ),
            exception_log_level,
            timeout: bool_var("APM_TIMEOUT", defaults.timeout),
            timeout_error_threshold: parsed_var("APM_TIMEOUT_ERROR_THRESHOLD")
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout_error_threshold),
            log_body: bool_var("APM_LOG_BODY", defaults.log_body),
            ignore,
            capture_frame: bool_var("APM_CAPTURE_FRAME", defaults.capture_frame),
            flush_interval: parsed_var("APM_FLUSH_INTERVAL")
                .map(Duration::from_secs)
                .unwrap_or(defaults.flush_interval),
            max_queue_size: parsed_var("APM_MAX_QUEUE_SIZE").unwrap_or(defaults.max_queue_size),
            api_host: env::var("APM_API_HOST").unwrap_or(defaults.api_host),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        if self.max_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "Max queue size must be greater than 0".to_string(),
            ));
        }

        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "Flush interval must be greater than 0".to_string(),
            ));
        }

        if self.api_host.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "APM_API_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// The agent only sends data when it is active and fully identified.
    pub fn is_enabled(&self) -> bool {
        self.active
            && self.app_id.is_some()
            && self.organization_id.is_some()
            && self.secret_token.is_some()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|val| !val.trim().is_empty())
}

fn bool_var(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|val| val.to_lowercase() != "false")
        .unwrap_or(default)
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.trim().parse::<T>().ok())
}
