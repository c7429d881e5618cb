#![forbid(unsafe_code)]

//! End-to-end harness for faultline.
//!
//! [`E2eApp`] runs a demo application as a subprocess in test mode, kills it
//! when it outlives its timeout, and hands back a [`LogReader`] over the log
//! the application wrote through [`AppLog`].

pub mod app;
pub mod app_log;
pub mod error;
pub mod log_reader;

pub use app::{E2eApp, RunOptions, default_timeout, strip_noise};
pub use app_log::{AppLog, LOG_DIR_ENV, LOG_FILE_NAME};
pub use error::{HarnessError, Result};
pub use log_reader::{LogEntry, LogReader};
