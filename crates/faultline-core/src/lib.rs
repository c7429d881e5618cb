#![forbid(unsafe_code)]

//! Faultline Core
//!
//! Error interception and reporting for a host process and the rendering
//! surfaces it owns.
//!
//! # Key Components
//!
//! - [`Thrown`] / [`normalize`] - Any thrown value becomes a [`NormalizedError`]
//!   with a non-empty message and stack
//! - [`ReportingPipeline`] - Override hook, then log sink, then failure dialog,
//!   with a fallback channel when a step fails
//! - [`IssueLinker`] - Issue-tracker deep links opened through the [`Platform`]
//! - [`ErrorCapture`] - The `Inactive`/`Active` capture state machine
//! - [`RendererBridge`] / [`BridgeScript`] - Forwarding of surface errors to the
//!   host over a JSON message channel
//! - [`HostEvents`] - Uncaught-error (panic) and unhandled-rejection events
//!
//! # Example
//!
//! ```rust,ignore
//! use faultline_core::{CaptureOptions, ErrorCapture};
//!
//! let capture = ErrorCapture::new(CaptureOptions::from_env());
//! capture.start_catching(CaptureOptions::new().with_show_dialog(false));
//! ```

pub mod bridge;
pub mod capture;
pub mod config;
pub mod error;
pub mod host_events;
pub mod issue;
pub mod logging;
pub mod pipeline;
pub mod platform;
pub mod surface;
pub mod thrown;

pub use bridge::{
    BridgeMessage, BridgeScript, InjectionMode, LogLevel, RendererBridge, RendererLog,
    SurfaceInjector, SurfaceLink, channel,
};
pub use capture::{CaptureState, Collaborators, ErrorCapture, ReportOverrides};
pub use config::CaptureOptions;
pub use error::{BridgeError, CollaboratorError, ConfigError, PipelineFailure};
pub use host_events::{
    HostEventKind, HostEvents, ListenerId, catch_panic, install_panic_hook,
};
pub use issue::{IssueLink, IssueLinker};
#[cfg(feature = "subscriber")]
pub use logging::init_tracing;
pub use logging::tracing_sink;
pub use pipeline::{
    HookArgs, HookOutcome, ProcessRole, ReportContext, ReportKind, ReportOutcome,
    ReportingPipeline,
};
pub use platform::{HeadlessPlatform, Platform, SystemPlatform, Versions};
pub use surface::{Surface, SurfaceEnv, SurfaceEvent, SurfaceId, Surfaces};
pub use thrown::{NormalizedError, Thrown, normalize};
