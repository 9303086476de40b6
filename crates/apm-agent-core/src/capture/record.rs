// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::capture::stacktrace::StackFrame;
use crate::config::ErrorLevel;
use crate::instrumentation::request::RequestContext;

/// Error or message record handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub culprit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Map<String, Value>>,
    pub extra: Map<String, Value>,
    pub machine: Machine,
    pub timestamp: String,
    pub level: ErrorLevel,
}

impl ErrorRecord {
    /// The record's correlation id, always present in `extra.uuid`.
    pub fn uuid(&self) -> Option<&str> {
        self.extra.get("uuid").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub uncaught: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stacktrace {
    pub frames: Vec<StackFrame>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Machine {
    pub hostname: String,
}

/// Inbound request details attached to an error record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpContext {
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Anything `capture_error` accepts: a native error or a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Capturable {
    Exception {
        type_name: String,
        value: String,
        module: Option<String>,
        /// Frames the error was raised with. When absent the stack is
        /// captured at the `capture_error` call.
        frames: Option<Vec<StackFrame>>,
        uncaught: bool,
    },
    Message {
        message: String,
        param_message: Option<String>,
    },
}

impl Capturable {
    /// Exception named after the static type of `err`. Trait objects such as
    /// `Box<dyn Error>` do not name their concrete type and are reported as
    /// a plain `Error`; use [`Capturable::error_named`] for those.
    pub fn error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let full_type = std::any::type_name::<E>();
        if full_type.starts_with("dyn ") {
            return Self::exception("Error".to_string(), None, err);
        }

        // generic arguments carry paths of their own
        let path_end = full_type.find('<').unwrap_or(full_type.len());
        let (module, type_name) = match full_type[..path_end].rsplit_once("::") {
            Some((module, name)) => (
                Some(module.to_string()),
                format!("{name}{}", &full_type[path_end..]),
            ),
            None => (None, full_type.to_string()),
        };
        Self::exception(type_name, module, err)
    }

    pub fn error_named<E: std::error::Error + ?Sized>(
        type_name: impl Into<String>,
        err: &E,
    ) -> Self {
        Self::exception(type_name.into(), None, err)
    }

    fn exception<E: std::error::Error + ?Sized>(
        type_name: String,
        module: Option<String>,
        err: &E,
    ) -> Self {
        let mut value = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            value.push_str(": ");
            value.push_str(&cause.to_string());
            source = cause.source();
        }

        Self::Exception {
            type_name,
            value,
            module,
            frames: None,
            uncaught: false,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
            param_message: None,
        }
    }

    /// Message built from a `%s` template. The template is kept as
    /// `param_message` so occurrences group together regardless of params.
    pub fn format(template: &str, params: &[&dyn Display]) -> Self {
        let mut params = params.iter();
        let mut message = String::with_capacity(template.len());
        let mut pieces = template.split("%s").peekable();
        while let Some(piece) = pieces.next() {
            message.push_str(piece);
            if pieces.peek().is_some() {
                match params.next() {
                    Some(param) => message.push_str(&param.to_string()),
                    None => message.push_str("%s"),
                }
            }
        }
        for extra in params {
            message.push(' ');
            message.push_str(&extra.to_string());
        }

        Self::Message {
            message,
            param_message: Some(template.to_string()),
        }
    }

    /// Message from an arbitrary JSON value. Objects carrying a string
    /// `message` use it, anything else is serialized as is.
    pub fn json(value: &Value) -> Self {
        match value {
            Value::String(message) => Self::message(message.clone()),
            Value::Object(map) => match map.get("message").and_then(Value::as_str) {
                Some(message) => Self::message(message),
                None => Self::message(value.to_string()),
            },
            other => Self::message(other.to_string()),
        }
    }

    pub fn with_frames(self, frames: Vec<StackFrame>) -> Self {
        match self {
            Self::Exception {
                type_name,
                value,
                module,
                uncaught,
                ..
            } => Self::Exception {
                type_name,
                value,
                module,
                frames: Some(frames),
                uncaught,
            },
            message => message,
        }
    }

    pub fn uncaught(self) -> Self {
        match self {
            Self::Exception {
                type_name,
                value,
                module,
                frames,
                ..
            } => Self::Exception {
                type_name,
                value,
                module,
                frames,
                uncaught: true,
            },
            message => message,
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self, Self::Message { .. })
    }
}

impl From<&str> for Capturable {
    fn from(message: &str) -> Self {
        Self::message(message)
    }
}

impl From<String> for Capturable {
    fn from(message: String) -> Self {
        Self::message(message)
    }
}

/// Caller-supplied data merged into the record.
#[derive(Debug, Clone, Default)]
pub struct CaptureContext {
    /// Explicit request; when absent the current transaction's request is used
    pub request: Option<RequestContext>,
    pub extra: Map<String, Value>,
    pub user: Option<Map<String, Value>>,
    pub culprit: Option<String>,
    pub level: Option<ErrorLevel>,
}

impl CaptureContext {
    pub fn with_request(mut self, request: RequestContext) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_culprit(mut self, culprit: impl Into<String>) -> Self {
        self.culprit = Some(culprit.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("connection reset")]
    struct ResetError;

    #[derive(Debug, thiserror::Error)]
    #[error("query failed")]
    struct QueryError(#[source] ResetError);

    #[test]
    fn test_error_includes_type_and_source_chain() {
        let capturable = Capturable::error(&QueryError(ResetError));
        match capturable {
            Capturable::Exception {
                type_name,
                value,
                module,
                frames,
                uncaught,
            } => {
                assert_eq!(type_name, "QueryError");
                assert_eq!(value, "query failed: connection reset");
                assert!(module.unwrap().ends_with("record::tests"));
                assert!(frames.is_none());
                assert!(!uncaught);
            }
            Capturable::Message { .. } => panic!("expected an exception"),
        }
    }

    #[test]
    fn test_trait_object_error_has_no_module() {
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(QueryError(ResetError));
        let Capturable::Exception {
            type_name,
            value,
            module,
            ..
        } = Capturable::error(boxed.as_ref())
        else {
            panic!("expected an exception");
        };
        assert_eq!(type_name, "Error");
        assert_eq!(value, "query failed: connection reset");
        assert!(module.is_none());

        let Capturable::Exception {
            type_name, module, ..
        } = Capturable::error_named("QueryError", boxed.as_ref())
        else {
            panic!("expected an exception");
        };
        assert_eq!(type_name, "QueryError");
        assert!(module.is_none());
    }

    #[test]
    fn test_generic_error_keeps_type_arguments() {
        #[derive(Debug, thiserror::Error)]
        #[error("wrapped")]
        struct Wrapped<T: std::fmt::Debug>(T);

        let Capturable::Exception {
            type_name, module, ..
        } = Capturable::error(&Wrapped(ResetError))
        else {
            panic!("expected an exception");
        };
        assert!(type_name.starts_with("Wrapped<"));
        assert!(type_name.ends_with("ResetError>"));
        assert!(!module.unwrap().contains('<'));
    }

    #[test]
    fn test_format_replaces_params_in_order() {
        let capturable = Capturable::format("user %s failed to pay %s", &[&"bob", &42]);
        assert_eq!(
            capturable,
            Capturable::Message {
                message: "user bob failed to pay 42".to_string(),
                param_message: Some("user %s failed to pay %s".to_string()),
            }
        );
    }

    #[test]
    fn test_format_with_missing_and_extra_params() {
        let missing = Capturable::format("a %s b %s", &[&1]);
        assert_eq!(
            missing,
            Capturable::Message {
                message: "a 1 b %s".to_string(),
                param_message: Some("a %s b %s".to_string()),
            }
        );

        let extra = Capturable::format("plain", &[&1, &2]);
        assert_eq!(
            extra,
            Capturable::Message {
                message: "plain 1 2".to_string(),
                param_message: Some("plain".to_string()),
            }
        );
    }

    #[test]
    fn test_json_messages() {
        assert_eq!(
            Capturable::json(&json!({"message": "boom", "code": 3})),
            Capturable::message("boom")
        );
        assert_eq!(
            Capturable::json(&json!({"code": 3})),
            Capturable::message("{\"code\":3}")
        );
        assert_eq!(Capturable::json(&json!("hi")), Capturable::message("hi"));
    }

    #[test]
    fn test_with_frames_and_uncaught_only_touch_exceptions() {
        let frames = vec![StackFrame::new("app::run", "/srv/app/src/lib.rs", Some(1))];
        let message = Capturable::message("m").with_frames(frames.clone()).uncaught();
        assert!(message.is_message());

        let exception = Capturable::error(&ResetError).with_frames(frames.clone()).uncaught();
        match exception {
            Capturable::Exception {
                frames: Some(f),
                uncaught: true,
                ..
            } => assert_eq!(f, frames),
            other => panic!("unexpected {other:?}"),
        }
    }
}
