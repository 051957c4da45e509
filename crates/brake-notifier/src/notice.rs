// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The diagnostic event shipped by the notifier.
//!
//! A [`Notice`] is owned by whoever is processing it: filters take it by value and hand it
//! back, so by the time the transport sees a notice every filter has finished with it.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

/// Free-form key/value mapping used for context, environment, and session data.
pub type Params = HashMap<String, Value>;

/// A single backtrace frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub file: String,
    pub line: u32,
    #[serde(rename = "function")]
    pub func: String,
}

impl StackFrame {
    pub fn new(file: impl Into<String>, line: u32, func: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            func: func.into(),
        }
    }
}

/// One error record carried by a notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoticeError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub backtrace: Vec<StackFrame>,
}

/// An error report on its way to the intake.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Notice {
    pub errors: Vec<NoticeError>,
    pub context: Params,
    #[serde(rename = "environment")]
    pub env: Params,
    pub session: Params,
}

impl Notice {
    /// Builds a notice holding a single error with an empty backtrace.
    ///
    /// The context is seeded with the host operating system and the language name so that
    /// notices are attributable even when no filter enriches them.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let mut context = Params::new();
        context.insert("os".to_string(), Value::from(std::env::consts::OS));
        context.insert("language".to_string(), Value::from("rust"));

        Self {
            errors: vec![NoticeError {
                kind: kind.into(),
                message: message.into(),
                backtrace: Vec::new(),
            }],
            context,
            env: Params::new(),
            session: Params::new(),
        }
    }

    /// Attaches `frames` to the first error record.
    pub fn with_backtrace(mut self, frames: Vec<StackFrame>) -> Self {
        if let Some(error) = self.errors.first_mut() {
            error.backtrace = frames;
        }
        self
    }

    /// Returns the context value stored under `key` when it is a string.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    /// Inserts or overwrites a context entry.
    pub fn set_context(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.context.insert(key.into(), value.into());
    }
}
