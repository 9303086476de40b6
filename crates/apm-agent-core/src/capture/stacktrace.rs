// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// One resolved frame of a captured stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub function: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// False for frames from the standard library or from dependencies
    pub in_app: bool,
}

impl StackFrame {
    pub fn new(function: impl Into<String>, filename: impl Into<String>, lineno: Option<u32>) -> Self {
        let function = function.into();
        let filename = filename.into();
        Self {
            module: module_of(&function),
            in_app: is_in_app(&filename),
            function,
            filename,
            lineno,
            colno: None,
        }
    }

    fn from_symbol(symbol: &backtrace::Symbol) -> Self {
        // `{:#}` drops the trailing symbol hash
        let function = symbol
            .name()
            .map(|name| format!("{name:#}"))
            .unwrap_or_else(|| "<unknown>".to_string());
        let filename = symbol
            .filename()
            .map(|path| path.display().to_string())
            .unwrap_or_default();

        Self {
            module: module_of(&function),
            in_app: is_in_app(&filename),
            function,
            filename,
            lineno: symbol.lineno(),
            colno: symbol.colno(),
        }
    }

    /// `function (file)` label used as an error culprit.
    pub fn culprit(&self) -> String {
        format!("{} ({})", self.function, self.filename)
    }

    fn is_agent_frame(&self) -> bool {
        let function = self.function.trim_start_matches('<');
        function.starts_with("backtrace::")
            || (function.starts_with(env!("CARGO_CRATE_NAME")) && !function.contains("::tests::"))
    }
}

/// Captures the current stack, innermost frame first, without the agent's
/// own leading frames. At most `limit` frames are kept.
pub fn capture_frames(limit: usize) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    backtrace::trace(|frame| {
        backtrace::resolve_frame(frame, |symbol| {
            frames.push(StackFrame::from_symbol(symbol));
        });
        true
    });

    frames
        .into_iter()
        .skip_while(StackFrame::is_agent_frame)
        .take(limit)
        .collect()
}

/// Culprit of the innermost in-app frame, if any.
pub fn find_culprit(frames: &[StackFrame]) -> Option<String> {
    frames.iter().find(|frame| frame.in_app).map(StackFrame::culprit)
}

fn module_of(function: &str) -> Option<String> {
    function
        .trim_start_matches('<')
        .rsplit_once("::")
        .map(|(module, _)| module.to_string())
}

fn is_in_app(filename: &str) -> bool {
    !(filename.is_empty()
        || filename.starts_with("/rustc/")
        || filename.contains("/.cargo/registry/")
        || filename.contains("/.cargo/git/")
        || filename.contains("/.rustup/")
        || filename.contains("/library/std/")
        || filename.contains("/library/core/"))
}
