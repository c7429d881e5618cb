use std::process::ExitStatus;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Terminate {app} by timeout ({seconds}s)")]
    Timeout { app: String, seconds: f64 },

    #[error("{app} failed: {status}")]
    AppFailed { app: String, status: ExitStatus },
}

impl HarnessError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Timeout { .. } => 124,
            Self::AppFailed { status, .. } => status.code().unwrap_or(1),
            Self::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HarnessError;

    #[test]
    fn timeout_message_names_app_and_seconds() {
        let error = HarnessError::Timeout {
            app: "demo".to_string(),
            seconds: 5.0,
        };
        assert_eq!(error.to_string(), "Terminate demo by timeout (5s)");
        assert_eq!(error.exit_code(), 124);
    }

    #[test]
    fn fractional_timeouts_keep_their_precision() {
        let error = HarnessError::Timeout {
            app: "demo".to_string(),
            seconds: 0.5,
        };
        assert_eq!(error.to_string(), "Terminate demo by timeout (0.5s)");
    }
}
