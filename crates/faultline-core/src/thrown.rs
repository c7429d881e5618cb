#![forbid(unsafe_code)]

//! Normalization of thrown values.
//!
//! Everything that can reach the reporting pipeline enters as a [`Thrown`]:
//! a panic payload, an error value, a rejection reason, or a message decoded
//! from a rendering surface. [`normalize`] turns any of them into a
//! [`NormalizedError`] that always carries a non-empty message and stack.
//!
//! # Variants
//!
//! | Variant | Source | Message | Stack |
//! |---------|--------|---------|-------|
//! | `Shaped` | errors, panics with a string payload | kept | kept (synthesized if empty) |
//! | `Raw` | arbitrary rejection reasons | JSON text of the value | synthesized |
//! | `Opaque` | panic payloads of unknown type | `"unknown error"` | synthesized |
//!
//! A synthesized stack names the location that called [`normalize`] and
//! appends the captured backtrace when `RUST_BACKTRACE` enables capture.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;
use std::panic::Location;

/// Message used when nothing better can be derived from a thrown value.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// A value that was thrown, panicked with, or used as a rejection reason.
#[derive(Debug, Clone, PartialEq)]
pub enum Thrown {
    /// An error-shaped value that already has a message and a stack.
    Shaped { message: String, stack: String },
    /// Any other value, kept in its structured form.
    Raw(serde_json::Value),
    /// A value that has no textual representation (non-string panic payload).
    Opaque { description: &'static str },
}

impl Thrown {
    /// An error-shaped value with only a message; the stack is synthesized
    /// during normalization.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Shaped {
            message: message.into(),
            stack: String::new(),
        }
    }

    /// An error-shaped value with an explicit stack.
    pub fn shaped(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self::Shaped {
            message: message.into(),
            stack: stack.into(),
        }
    }

    /// A non-error value, e.g. a rejection reason that is plain data.
    pub fn raw(value: impl Into<serde_json::Value>) -> Self {
        Self::Raw(value.into())
    }

    /// Capture an error value together with its source chain.
    #[track_caller]
    pub fn from_error(error: &(dyn Error + 'static)) -> Self {
        let message = error.to_string();
        let mut stack = synthesize_stack(&message, Location::caller());
        let mut source = error.source();
        while let Some(cause) = source {
            stack.push_str("\nCaused by: ");
            stack.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::Shaped { message, stack }
    }

    /// Capture a panic payload.
    ///
    /// `&str` and `String` payloads become error-shaped values whose stack
    /// starts at the panic location; anything else is [`Thrown::Opaque`].
    pub fn from_panic(payload: &(dyn Any + Send), location: Option<&Location<'_>>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&'static str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            return Self::Opaque {
                description: "non-string panic payload",
            };
        };

        let stack = match location {
            Some(location) => synthesize_stack(&message, location),
            None => String::new(),
        };
        Self::Shaped { message, stack }
    }
}

impl From<&str> for Thrown {
    fn from(message: &str) -> Self {
        Self::message(message)
    }
}

impl From<String> for Thrown {
    fn from(message: String) -> Self {
        Self::message(message)
    }
}

impl From<serde_json::Value> for Thrown {
    fn from(value: serde_json::Value) -> Self {
        Self::Raw(value)
    }
}

impl fmt::Display for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shaped { message, stack } if stack.is_empty() => f.write_str(message),
            Self::Shaped { stack, .. } => f.write_str(stack),
            Self::Raw(value) => write!(f, "{value}"),
            Self::Opaque { description } => write!(f, "{UNKNOWN_ERROR} ({description})"),
        }
    }
}

/// Uniform representation of a captured error.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedError {
    message: String,
    stack: String,
    original: Thrown,
}

impl NormalizedError {
    /// The error message. Never empty.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The stack trace text. Never empty.
    #[must_use]
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// The value as it was thrown, before normalization.
    #[must_use]
    pub fn original(&self) -> &Thrown {
        &self.original
    }
}

impl fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for NormalizedError {}

/// Convert any thrown value into a [`NormalizedError`].
///
/// Error-shaped values with both fields present pass through unchanged.
/// Everything else gets a message derived from the value and a stack
/// synthesized at the caller's location. This function does not panic.
#[track_caller]
pub fn normalize(value: Thrown) -> NormalizedError {
    let location = Location::caller();
    let (message, stack) = match &value {
        Thrown::Shaped { message, stack } => {
            let message = if message.is_empty() {
                UNKNOWN_ERROR.to_string()
            } else {
                message.clone()
            };
            let stack = if stack.is_empty() {
                synthesize_stack(&message, location)
            } else {
                stack.clone()
            };
            (message, stack)
        }
        Thrown::Raw(raw) => {
            let message = serialize_raw(raw);
            let stack = synthesize_stack(&message, location);
            (message, stack)
        }
        Thrown::Opaque { .. } => {
            let message = UNKNOWN_ERROR.to_string();
            let stack = synthesize_stack(&message, location);
            (message, stack)
        }
    };

    NormalizedError {
        message,
        stack,
        original: value,
    }
}

fn serialize_raw(value: &serde_json::Value) -> String {
    serde_json::to_string(value)
        .ok()
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| UNKNOWN_ERROR.to_string())
}

fn synthesize_stack(message: &str, location: &Location<'_>) -> String {
    let mut stack = format!(
        "Error: {message}\n    at {}:{}:{}",
        location.file(),
        location.line(),
        location.column()
    );
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        stack.push('\n');
        stack.push_str(&backtrace.to_string());
    }
    stack
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Outer(Inner);

    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("config load failed")
        }
    }

    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("file not found")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    impl Error for Inner {}

    #[test]
    fn shaped_value_passes_through_unchanged() {
        let thrown = Thrown::shaped("boom", "Error: boom\n    at app.rs:1:1");
        let normalized = normalize(thrown.clone());
        assert_eq!(normalized.message(), "boom");
        assert_eq!(normalized.stack(), "Error: boom\n    at app.rs:1:1");
        assert_eq!(normalized.original(), &thrown);
    }

    #[test]
    fn message_only_value_gets_synthesized_stack() {
        let normalized = normalize(Thrown::from("disk full"));
        assert_eq!(normalized.message(), "disk full");
        assert!(normalized.stack().starts_with("Error: disk full\n    at "));
        assert!(normalized.stack().contains("thrown.rs"));
    }

    #[test]
    fn raw_string_keeps_json_quotes() {
        let normalized = normalize(Thrown::raw("nope"));
        assert_eq!(normalized.message(), "\"nope\"");
    }

    #[test]
    fn raw_object_serializes_structurally() {
        let normalized = normalize(Thrown::raw(json!({ "code": 7 })));
        assert_eq!(normalized.message(), r#"{"code":7}"#);
        assert!(!normalized.stack().is_empty());
    }

    #[test]
    fn raw_null_is_still_a_message() {
        let normalized = normalize(Thrown::Raw(serde_json::Value::Null));
        assert_eq!(normalized.message(), "null");
    }

    #[test]
    fn opaque_value_becomes_unknown_error() {
        let normalized = normalize(Thrown::Opaque {
            description: "non-string panic payload",
        });
        assert_eq!(normalized.message(), UNKNOWN_ERROR);
        assert!(normalized.stack().starts_with("Error: unknown error"));
    }

    #[test]
    fn empty_shaped_fields_are_filled() {
        let normalized = normalize(Thrown::shaped("", ""));
        assert_eq!(normalized.message(), UNKNOWN_ERROR);
        assert!(!normalized.stack().is_empty());
    }

    #[test]
    fn from_error_records_source_chain() {
        let thrown = Thrown::from_error(&Outer(Inner));
        let normalized = normalize(thrown);
        assert_eq!(normalized.message(), "config load failed");
        assert!(normalized.stack().contains("Caused by: file not found"));
    }

    #[test]
    fn from_panic_reads_str_and_string_payloads() {
        let location = Location::caller();
        let text: Box<dyn Any + Send> = Box::new("static boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned boom"));

        match Thrown::from_panic(text.as_ref(), Some(location)) {
            Thrown::Shaped { message, stack } => {
                assert_eq!(message, "static boom");
                assert!(stack.contains(location.file()));
            }
            other => panic!("expected shaped value, got {other:?}"),
        }
        match Thrown::from_panic(owned.as_ref(), None) {
            Thrown::Shaped { message, stack } => {
                assert_eq!(message, "owned boom");
                assert!(stack.is_empty());
            }
            other => panic!("expected shaped value, got {other:?}"),
        }
    }

    #[test]
    fn from_panic_with_unknown_payload_is_opaque() {
        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert!(matches!(
            Thrown::from_panic(payload.as_ref(), None),
            Thrown::Opaque { .. }
        ));
    }

    #[test]
    fn display_prefers_stack_for_shaped_values() {
        assert_eq!(Thrown::shaped("m", "s").to_string(), "s");
        assert_eq!(Thrown::message("m").to_string(), "m");
        assert_eq!(Thrown::raw(json!([1, 2])).to_string(), "[1,2]");
    }
}
