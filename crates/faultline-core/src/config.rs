#![forbid(unsafe_code)]

//! Capture configuration.
//!
//! [`CaptureOptions`] is a partial configuration: every field is optional and
//! only the fields that are present overwrite the session's current values
//! (see [`ErrorCapture::set_options`](crate::capture::ErrorCapture::set_options)).
//!
//! # Loading
//!
//! Options can also come from loosely typed sources. Each recognized key is
//! validated on its own; a value of the wrong type is ignored (with a
//! warning) so that it cannot clobber the current setting.
//!
//! ```toml
//! # faultline.toml
//! showDialog = false
//! includeRenderer = true
//! ```
//!
//! ```rust,ignore
//! let options = CaptureOptions::from_toml_file("faultline.toml")?;
//! let options = CaptureOptions::from_json_str(r#"{ "showDialog": "yes" }"#)?; // show_dialog stays None
//! let options = CaptureOptions::from_env();
//! ```
//!
//! | Field | Document keys | Environment |
//! |-------|---------------|-------------|
//! | `show_dialog` | `showDialog`, `show_dialog` | `FAULTLINE_SHOW_DIALOG` |
//! | `forward_to_renderers` | `includeRenderer`, `include_renderer`, `forwardToRenderers`, `forward_to_renderers` | `FAULTLINE_INCLUDE_RENDERER` |
//!
//! `logFn` and `onError` are code, not data; documents that name them get a
//! warning and the keys are skipped.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{CollaboratorError, ConfigError};
use crate::pipeline::{HookArgs, HookOutcome, LogFn, OnErrorFn};
use crate::thrown::NormalizedError;

pub const SHOW_DIALOG_ENV: &str = "FAULTLINE_SHOW_DIALOG";
pub const INCLUDE_RENDERER_ENV: &str = "FAULTLINE_INCLUDE_RENDERER";

const SHOW_DIALOG_KEYS: &[&str] = &["showDialog", "show_dialog"];
const FORWARD_KEYS: &[&str] = &[
    "includeRenderer",
    "include_renderer",
    "forwardToRenderers",
    "forward_to_renderers",
];
const CODE_KEYS: &[&str] = &["logFn", "log_fn", "onError", "on_error"];

/// Partial capture configuration. `None` means "leave unchanged".
#[derive(Clone, Default)]
pub struct CaptureOptions {
    /// Inject the forwarding bridge into rendering surfaces on start.
    pub forward_to_renderers: Option<bool>,
    /// Log sink.
    pub log_fn: Option<LogFn>,
    /// Override hook.
    pub on_error: Option<OnErrorFn>,
    /// Show the failure dialog for non-rejection reports.
    pub show_dialog: Option<bool>,
}

impl fmt::Debug for CaptureOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureOptions")
            .field("forward_to_renderers", &self.forward_to_renderers)
            .field("log_fn", &self.log_fn.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("show_dialog", &self.show_dialog)
            .finish()
    }
}

impl CaptureOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_forward_to_renderers(mut self, enabled: bool) -> Self {
        self.forward_to_renderers = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_show_dialog(mut self, enabled: bool) -> Self {
        self.show_dialog = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_log_fn(mut self, log_fn: LogFn) -> Self {
        self.log_fn = Some(log_fn);
        self
    }

    /// Set the log sink from a closure.
    #[must_use]
    pub fn with_log<F>(self, log: F) -> Self
    where
        F: Fn(Option<&str>, &NormalizedError) -> Result<(), CollaboratorError>
            + Send
            + Sync
            + 'static,
    {
        self.with_log_fn(Arc::new(log))
    }

    #[must_use]
    pub fn with_on_error_fn(mut self, on_error: OnErrorFn) -> Self {
        self.on_error = Some(on_error);
        self
    }

    /// Set the override hook from a closure.
    #[must_use]
    pub fn with_on_error<F>(self, on_error: F) -> Self
    where
        F: Fn(&HookArgs<'_>) -> Result<HookOutcome, CollaboratorError> + Send + Sync + 'static,
    {
        self.with_on_error_fn(Arc::new(on_error))
    }

    /// Overlay `other` on top of `self`: fields present in `other` win.
    #[must_use]
    pub fn merged_with(mut self, other: CaptureOptions) -> Self {
        if other.forward_to_renderers.is_some() {
            self.forward_to_renderers = other.forward_to_renderers;
        }
        if other.log_fn.is_some() {
            self.log_fn = other.log_fn;
        }
        if other.on_error.is_some() {
            self.on_error = other.on_error;
        }
        if other.show_dialog.is_some() {
            self.show_dialog = other.show_dialog;
        }
        self
    }

    /// Read options from a JSON-like document. The root must be an object.
    pub fn from_value(document: &Value) -> Result<Self, ConfigError> {
        let Value::Object(map) = document else {
            return Err(ConfigError::NotATable {
                found: value_kind(document),
            });
        };

        for key in CODE_KEYS {
            if map.contains_key(*key) {
                tracing::warn!(
                    target: "faultline.config",
                    key = %key,
                    "hooks cannot be set from a document; key ignored"
                );
            }
        }

        Ok(Self {
            forward_to_renderers: bool_field(map, FORWARD_KEYS),
            show_dialog: bool_field(map, SHOW_DIALOG_KEYS),
            ..Self::default()
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let document: Value = serde_json::from_str(text)?;
        Self::from_value(&document)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let document: Value = toml::from_str(text)?;
        Self::from_value(&document)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Read options from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Read options through `lookup`, which maps a variable name to its value.
    #[must_use]
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            forward_to_renderers: env_flag(&lookup, INCLUDE_RENDERER_ENV),
            show_dialog: env_flag(&lookup, SHOW_DIALOG_ENV),
            ..Self::default()
        }
    }
}

fn bool_field(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<bool> {
    let (key, value) = keys
        .iter()
        .find_map(|key| map.get(*key).map(|value| (*key, value)))?;
    match value {
        Value::Bool(flag) => Some(*flag),
        other => {
            tracing::warn!(
                target: "faultline.config",
                key = %key,
                found = value_kind(other),
                "expected a boolean; value ignored"
            );
            None
        }
    }
}

fn env_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(
                target: "faultline.config",
                key = %key,
                value = %raw,
                "expected a boolean flag; value ignored"
            );
            None
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn builder_sets_only_named_fields() {
        let options = CaptureOptions::new().with_show_dialog(false);
        assert_eq!(options.show_dialog, Some(false));
        assert_eq!(options.forward_to_renderers, None);
        assert!(options.log_fn.is_none());
        assert!(options.on_error.is_none());
    }

    #[test]
    fn merged_with_keeps_absent_fields() {
        let base = CaptureOptions::new()
            .with_show_dialog(true)
            .with_forward_to_renderers(false);
        let merged = base.merged_with(CaptureOptions::new().with_show_dialog(false));
        assert_eq!(merged.show_dialog, Some(false));
        assert_eq!(merged.forward_to_renderers, Some(false));
    }

    #[test]
    fn document_accepts_both_key_styles() {
        let camel = CaptureOptions::from_value(&json!({
            "showDialog": false,
            "includeRenderer": true
        }))
        .expect("object root");
        assert_eq!(camel.show_dialog, Some(false));
        assert_eq!(camel.forward_to_renderers, Some(true));

        let snake = CaptureOptions::from_value(&json!({ "forward_to_renderers": false }))
            .expect("object root");
        assert_eq!(snake.forward_to_renderers, Some(false));
        assert_eq!(snake.show_dialog, None);
    }

    #[test]
    fn wrong_typed_value_is_ignored() {
        let options =
            CaptureOptions::from_json_str(r#"{ "showDialog": "yes" }"#).expect("valid json");
        assert_eq!(options.show_dialog, None);
    }

    #[test]
    fn hook_keys_are_skipped() {
        let options = CaptureOptions::from_value(&json!({ "onError": "function () {}" }))
            .expect("object root");
        assert!(options.on_error.is_none());
    }

    #[test]
    fn non_object_root_is_rejected() {
        let error = CaptureOptions::from_value(&json!([true])).expect_err("array root");
        assert!(matches!(error, ConfigError::NotATable { found: "array" }));
    }

    #[test]
    fn toml_documents_are_supported() {
        let options = CaptureOptions::from_toml_str("showDialog = false\ninclude_renderer = true\n")
            .expect("valid toml");
        assert_eq!(options.show_dialog, Some(false));
        assert_eq!(options.forward_to_renderers, Some(true));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let error = CaptureOptions::from_toml_str("showDialog = ").expect_err("truncated");
        assert!(error.to_string().starts_with("TOML error"));
    }

    #[test]
    fn env_flags_parse_common_spellings() {
        let vars: HashMap<&str, &str> = [
            (SHOW_DIALOG_ENV, "off"),
            (INCLUDE_RENDERER_ENV, "YES"),
        ]
        .into_iter()
        .collect();
        let options = CaptureOptions::from_env_with(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(options.show_dialog, Some(false));
        assert_eq!(options.forward_to_renderers, Some(true));
    }

    #[test]
    fn unparseable_env_flag_is_ignored() {
        let options = CaptureOptions::from_env_with(|key| {
            (key == SHOW_DIALOG_ENV).then(|| "sometimes".to_string())
        });
        assert_eq!(options.show_dialog, None);
        assert_eq!(options.forward_to_renderers, None);
    }
}
