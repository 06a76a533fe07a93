//! Mock response synthesis.
//!
//! Turns a handler resolution into the JSON envelope returned to the client.

use crate::registry::{HandlerError, MockHandler, Resolution};
use crate::request::MockRequest;
use crate::template::TemplateExpander;
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Fixed-shape response wrapper.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub return_code: i64,
    pub return_msg: String,
    pub result: Value,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            return_code: 0,
            return_msg: "OK".to_string(),
            result: Value::Array(Vec::new()),
        }
    }
}

impl Envelope {
    pub fn error(return_code: i64, return_msg: impl Into<String>, result: Value) -> Self {
        Self {
            return_code,
            return_msg: return_msg.into(),
            result,
        }
    }

    pub fn into_value(self) -> Value {
        json!({
            "returnCode": self.return_code,
            "returnMsg": self.return_msg,
            "result": self.result,
        })
    }

    /// Shallow-merge an expanded template over the default envelope.
    ///
    /// Every top-level key of an object expansion replaces the default; any
    /// other expansion becomes `result`.
    pub fn merge(expanded: Value) -> Value {
        let mut body = Self::default().into_value();
        match (expanded, &mut body) {
            (Value::Object(fields), Value::Object(base)) => {
                for (key, value) in fields {
                    base.insert(key, value);
                }
            }
            (other, Value::Object(base)) => {
                base.insert("result".to_string(), other);
            }
            _ => {}
        }
        body
    }
}

/// How a mock response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Found,
    NotFound,
    HandlerError,
}

impl MockOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MockOutcome::Found => "found",
            MockOutcome::NotFound => "not-found",
            MockOutcome::HandlerError => "handler-error",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            MockOutcome::Found | MockOutcome::NotFound => 200,
            MockOutcome::HandlerError => 500,
        }
    }
}

/// A synthesized response body and how it came about.
#[derive(Debug, Clone)]
pub struct Synthesized {
    pub outcome: MockOutcome,
    pub body: Value,
}

/// Invokes handlers and wraps their expanded output in the envelope.
pub struct MockResponseSynthesizer {
    expander: Arc<dyn TemplateExpander>,
}

impl MockResponseSynthesizer {
    pub fn new(expander: Arc<dyn TemplateExpander>) -> Self {
        Self { expander }
    }

    pub fn synthesize(&self, resolution: &Resolution, request: &MockRequest) -> Synthesized {
        let handler = match resolution {
            Resolution::NotFound => {
                return Synthesized {
                    outcome: MockOutcome::NotFound,
                    body: Envelope::default().into_value(),
                }
            }
            Resolution::Found(handler) => handler,
        };

        match self.invoke(handler.as_ref(), request) {
            Ok(expanded) => Synthesized {
                outcome: MockOutcome::Found,
                body: Envelope::merge(expanded),
            },
            Err(e) => {
                error!(path = %request.path, error = %e, "Mock handler failed");
                Synthesized {
                    outcome: MockOutcome::HandlerError,
                    body: Envelope::error(
                        500,
                        format!("mock handler failed: {e}"),
                        Value::Array(Vec::new()),
                    )
                    .into_value(),
                }
            }
        }
    }

    /// Run the handler and expand its descriptor. A panicking handler is
    /// reported as a failure of this request only.
    fn invoke(&self, handler: &dyn MockHandler, request: &MockRequest) -> Result<Value, HandlerError> {
        let descriptor = catch_unwind(AssertUnwindSafe(|| handler.respond(request)))
            .map_err(|panic| HandlerError::Failed(panic_message(panic.as_ref())))??;
        Ok(self.expander.expand(&descriptor)?)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
