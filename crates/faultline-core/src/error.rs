#![forbid(unsafe_code)]

//! Error types shared across the crate.

use thiserror::Error;

/// Failure reported by an external collaborator (log sink, override hook,
/// dialog renderer, URL opener).
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// A failure raised while the reporting pipeline was handling an error.
///
/// These never escape the pipeline; they are only used to describe why the
/// fallback channel was taken.
#[derive(Debug, Error)]
pub enum PipelineFailure {
    #[error("override hook failed: {0}")]
    Hook(CollaboratorError),

    #[error("log sink failed: {0}")]
    Sink(CollaboratorError),

    #[error("error dialog failed: {0}")]
    Dialog(CollaboratorError),

    #[error("reporting step panicked: {0}")]
    Panicked(String),
}

/// Errors raised while loading [`CaptureOptions`](crate::config::CaptureOptions)
/// from a document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("configuration root must be a table, found {found}")]
    NotATable { found: &'static str },
}

/// Errors on the surface → host message channel.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge message could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("bridge message could not be decoded: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("host side of the bridge is closed")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_failure_names_the_failing_step() {
        let failure = PipelineFailure::Sink("disk full".into());
        assert_eq!(failure.to_string(), "log sink failed: disk full");

        let failure = PipelineFailure::Panicked("hook exploded".to_string());
        assert_eq!(failure.to_string(), "reporting step panicked: hook exploded");
    }

    #[test]
    fn config_error_wraps_json_errors() {
        let error: ConfigError = serde_json::from_str::<serde_json::Value>("{")
            .expect_err("truncated document")
            .into();
        assert!(error.to_string().starts_with("JSON error:"));
    }
}
