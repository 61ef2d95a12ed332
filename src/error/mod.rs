//! Error taxonomy shared by every layer of the engine.
//!
//! Every failure in the engine is an `ExecutionError`: a `kind`, a human
//! message, and a free-form `details` bag that downstream layers use to
//! stash structured context (original payloads, retry hints, compensation
//! bookkeeping). There is no second error type for "internal" vs
//! "user-facing" failures — `details` carries the distinction.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The five kinds an `ExecutionError` can carry. Precedence when several
/// candidate kinds could apply to the same failure (aggregation, coercion):
/// `InvalidInput > ExecutionFailure > Timeout > Configuration > Internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidInput,
    ExecutionFailure,
    Timeout,
    Configuration,
    Internal,
}

impl ErrorKind {
    /// Position in the precedence order; lower sorts first.
    fn precedence(self) -> u8 {
        match self {
            ErrorKind::InvalidInput => 0,
            ErrorKind::ExecutionFailure => 1,
            ErrorKind::Timeout => 2,
            ErrorKind::Configuration => 3,
            ErrorKind::Internal => 4,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::ExecutionFailure => "execution_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Given two candidate kinds for the same failure, pick the one that takes
/// precedence (`InvalidInput > ExecutionFailure > Timeout > Configuration >
/// Internal`).
pub fn higher_precedence(a: ErrorKind, b: ErrorKind) -> ErrorKind {
    if a.precedence() <= b.precedence() {
        a
    } else {
        b
    }
}

/// A structured, typed failure produced anywhere in the engine.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    /// Wall-clock moment the error was constructed, for log correlation.
    /// Never used for deadline arithmetic — that's `Context`'s monotonic
    /// clock.
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Map::new(),
            occurred_at: chrono::Utc::now(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn execution_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutionFailure, message)
    }

    pub fn timeout(message: impl Into<String>, timeout_ms: u64) -> Self {
        let mut e = Self::new(ErrorKind::Timeout, message);
        e.details.insert("timeout".into(), Value::from(timeout_ms));
        e
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach or overwrite a key in `details`, builder-style.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Explicit retry override, if one has been set on `details.retry`.
    /// `None` means "use the kind-based default" (see `retry::is_retryable`).
    pub fn retry_override(&self) -> Option<bool> {
        self.details.get("retry").and_then(Value::as_bool)
    }

    pub fn set_retry(mut self, retry: bool) -> Self {
        self.details.insert("retry".into(), Value::Bool(retry));
        self
    }

    /// Rendering of a user action panicking inside its supervised task:
    /// `ExecutionFailure` with `details.original` set to the panic payload,
    /// stringified on a best-effort basis.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "action panicked".to_string()
        };
        Self::execution_failure(message.clone()).with_detail("original", message)
    }

    /// Rendering of a task that crashed or was aborted before completing.
    /// Mirrors §4.3's "DOWN reason != normal" path.
    pub fn from_join_error(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Self::execution_failure(format!("async task exited: {e}"))
                .with_detail("exit_reason", "cancelled")
        } else if e.is_panic() {
            let payload = e.into_panic();
            Self::from_panic(payload)
        } else {
            Self::execution_failure(format!("async task exited: {e}"))
        }
    }
}

/// The four outcome shapes an action's `run` (or, dynamically, the
/// `to_tool().invoke()` boundary) may produce, after normalization.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Ok {
        data: Map<String, Value>,
        directive: Option<Value>,
    },
    Err {
        error: ExecutionError,
        directive: Option<Value>,
    },
}

impl RunOutcome {
    pub fn ok(data: Map<String, Value>) -> Self {
        RunOutcome::Ok {
            data,
            directive: None,
        }
    }

    pub fn err(error: ExecutionError) -> Self {
        RunOutcome::Err {
            error,
            directive: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RunOutcome::Ok { .. })
    }

    pub fn directive(&self) -> Option<&Value> {
        match self {
            RunOutcome::Ok { directive, .. } => directive.as_ref(),
            RunOutcome::Err { directive, .. } => directive.as_ref(),
        }
    }
}

/// Implements the result-shape normalization table of §4.6 for a dynamic
/// `serde_json::Value` returned across the `to_tool().invoke()` boundary,
/// where a scripted or introspected caller can hand back anything. Internal
/// Rust call sites never need this: `Action::run` already returns a typed
/// `RunOutcome`, so the four well-formed shapes are enforced by the
/// compiler rather than by this function.
///
/// Idempotent: feeding the `Value` rendering of a previous call's output
/// back in yields the same `RunOutcome` (modulo directive round-tripping).
pub fn normalize_run_outcome(value: Value) -> RunOutcome {
    match value {
        Value::Object(mut map) => {
            if let Some(err_val) = map.remove("err") {
                let directive = map.remove("directive");
                let error = match err_val {
                    Value::Object(fields) => value_to_execution_error(Value::Object(fields)),
                    Value::String(s) => ExecutionError::execution_failure(s),
                    other => ExecutionError::execution_failure(inspect(&other)),
                };
                return RunOutcome::Err { error, directive };
            }
            if let Some(ok_val) = map.remove("ok") {
                let directive = map.remove("directive");
                let data = match ok_val {
                    Value::Object(fields) => fields,
                    other => {
                        let mut m = Map::new();
                        m.insert("value".into(), other);
                        m
                    }
                };
                return RunOutcome::Ok { data, directive };
            }
            // A bare map with no {ok,...}/{err,...} envelope is treated as a
            // successful result in its own right.
            RunOutcome::ok(map)
        }
        other => RunOutcome::err(ExecutionError::internal(format!(
            "unexpected run result: {}",
            inspect(&other)
        ))),
    }
}

fn value_to_execution_error(value: Value) -> ExecutionError {
    serde_json::from_value(value.clone())
        .unwrap_or_else(|_| ExecutionError::execution_failure(inspect(&value)))
}

/// Debug-ish stringification used when a non-exception error value bubbles
/// up and has to become a message string (§4.2's `stringify(value)`).
pub fn inspect(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_order() {
        assert_eq!(
            higher_precedence(ErrorKind::Timeout, ErrorKind::InvalidInput),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            higher_precedence(ErrorKind::Internal, ErrorKind::Configuration),
            ErrorKind::Configuration
        );
        assert_eq!(
            higher_precedence(ErrorKind::ExecutionFailure, ErrorKind::ExecutionFailure),
            ErrorKind::ExecutionFailure
        );
    }

    #[test]
    fn normalize_ok_map() {
        let v = serde_json::json!({"ok": {"a": 1}});
        match normalize_run_outcome(v) {
            RunOutcome::Ok { data, directive } => {
                assert_eq!(data.get("a").unwrap(), 1);
                assert!(directive.is_none());
            }
            _ => panic!("expected ok"),
        }
    }

    #[test]
    fn normalize_err_string() {
        let v = serde_json::json!({"err": "boom"});
        match normalize_run_outcome(v) {
            RunOutcome::Err { error, .. } => {
                assert_eq!(error.kind, ErrorKind::ExecutionFailure);
                assert_eq!(error.message, "boom");
            }
            _ => panic!("expected err"),
        }
    }

    #[test]
    fn normalize_bare_map_is_ok() {
        let v = serde_json::json!({"value": 42});
        match normalize_run_outcome(v) {
            RunOutcome::Ok { data, .. } => assert_eq!(data.get("value").unwrap(), 42),
            _ => panic!("expected ok"),
        }
    }

    #[test]
    fn normalize_scalar_is_internal() {
        let v = serde_json::json!(42);
        match normalize_run_outcome(v) {
            RunOutcome::Err { error, .. } => assert_eq!(error.kind, ErrorKind::Internal),
            _ => panic!("expected err"),
        }
    }

    #[test]
    fn retry_override_roundtrip() {
        let e = ExecutionError::timeout("slow", 50).set_retry(true);
        assert_eq!(e.retry_override(), Some(true));
    }
}
