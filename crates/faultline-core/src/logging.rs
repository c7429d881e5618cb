#![forbid(unsafe_code)]

//! Structured logging glue.
//!
//! - [`tracing_sink`] is the default log sink of an
//!   [`ErrorCapture`](crate::capture::ErrorCapture): every report becomes one
//!   `ERROR` event on target `faultline.report` with `label`, `message` and
//!   `stack` fields.
//! - [`init_tracing`] installs a fmt subscriber for binaries that do not set
//!   up their own. The filter comes from `FAULTLINE_LOG` (default `info`).
//!   With the `tracing-json` feature the output is JSON lines.

use std::sync::Arc;

use crate::pipeline::LogFn;

/// Environment variable holding the `EnvFilter` directives.
pub const LOG_FILTER_ENV: &str = "FAULTLINE_LOG";

/// Log sink that emits reports as `tracing` events.
pub fn tracing_sink() -> LogFn {
    Arc::new(|label, error| {
        tracing::error!(
            target: "faultline.report",
            label = label.unwrap_or(""),
            message = error.message(),
            stack = error.stack(),
            "{}",
            error.message()
        );
        Ok(())
    })
}

/// Install a global fmt subscriber writing to stderr.
///
/// Returns `false` if a global subscriber was already installed.
#[cfg(feature = "subscriber")]
pub fn init_tracing() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    #[cfg(feature = "tracing-json")]
    let result = builder.json().try_init();
    #[cfg(not(feature = "tracing-json"))]
    let result = builder.try_init();

    result.is_ok()
}
