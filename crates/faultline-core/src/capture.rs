#![forbid(unsafe_code)]

//! Error capture state machine.
//!
//! [`ErrorCapture`] owns the capture session: the current log sink, override
//! hook, dialog flag and renderer-forwarding flag, plus whether the host
//! listeners are attached.
//!
//! # States
//!
//! ```text
//!            start_catching            stop_catching
//! Inactive ─────────────────▶ Active ─────────────────▶ Inactive
//! ```
//!
//! - `start_catching` while `Active` does nothing: no duplicate listeners,
//!   no second injection.
//! - `stop_catching` detaches the host listeners only. Forwarding listeners
//!   already injected into rendering surfaces stay, and messages they send
//!   are still reported through [`ErrorCapture::handle`].
//!
//! # Invariants
//!
//! - Session fields change only through `set_options`, `start_catching` and
//!   `stop_catching`, and only fields the caller supplied are overwritten.
//! - Collaborators are never called while the session lock is held.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::bridge::{BridgeScript, InjectionMode, SurfaceInjector};
use crate::config::CaptureOptions;
use crate::error::CollaboratorError;
use crate::host_events::{HostEventKind, HostEvents, Listener, ListenerId};
use crate::issue::IssueLinker;
use crate::logging::tracing_sink;
use crate::pipeline::{
    FallbackFn, LogFn, OnErrorFn, ProcessRole, ReportContext, ReportKind, ReportOutcome,
    ReportingPipeline, stderr_fallback,
};
use crate::platform::{HeadlessPlatform, Platform, SystemPlatform};
use crate::thrown::{Thrown, normalize};

/// Lifecycle state of an [`ErrorCapture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Inactive,
    Active,
}

/// Per-call overrides for [`ErrorCapture::handle`].
#[derive(Clone, Default)]
pub struct ReportOverrides {
    kind: ReportKind,
    role: ProcessRole,
    log_fn: Option<LogFn>,
    on_error: Option<OnErrorFn>,
    show_dialog: Option<bool>,
}

impl fmt::Debug for ReportOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportOverrides")
            .field("kind", &self.kind)
            .field("role", &self.role)
            .field("log_fn", &self.log_fn.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("show_dialog", &self.show_dialog)
            .finish()
    }
}

impl ReportOverrides {
    #[must_use]
    pub fn new(kind: ReportKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: ProcessRole) -> Self {
        self.role = role;
        self
    }

    #[must_use]
    pub fn with_log_fn(mut self, log_fn: LogFn) -> Self {
        self.log_fn = Some(log_fn);
        self
    }

    #[must_use]
    pub fn with_on_error(mut self, on_error: OnErrorFn) -> Self {
        self.on_error = Some(on_error);
        self
    }

    #[must_use]
    pub fn with_show_dialog(mut self, show_dialog: bool) -> Self {
        self.show_dialog = Some(show_dialog);
        self
    }
}

/// External services an [`ErrorCapture`] works with.
#[derive(Clone)]
pub struct Collaborators {
    events: Arc<HostEvents>,
    platform: Arc<dyn Platform>,
    surfaces: Option<Arc<dyn SurfaceInjector>>,
    fallback: FallbackFn,
}

impl Default for Collaborators {
    /// The process-global host events, the system platform, no surfaces,
    /// and stderr as fallback channel.
    fn default() -> Self {
        Self {
            events: HostEvents::global(),
            platform: Arc::new(SystemPlatform),
            surfaces: None,
            fallback: stderr_fallback(),
        }
    }
}

impl Collaborators {
    /// A private event registry and a [`HeadlessPlatform`]; nothing touches
    /// the process panic hook, the display, or the URL opener.
    #[must_use]
    pub fn headless() -> Self {
        Self {
            events: Arc::new(HostEvents::new()),
            platform: Arc::new(HeadlessPlatform::new()),
            surfaces: None,
            fallback: stderr_fallback(),
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<HostEvents>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = platform;
        self
    }

    #[must_use]
    pub fn with_surfaces(mut self, surfaces: Arc<dyn SurfaceInjector>) -> Self {
        self.surfaces = Some(surfaces);
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: FallbackFn) -> Self {
        self.fallback = fallback;
        self
    }
}

struct CaptureSession {
    state: CaptureState,
    forward_to_renderers: bool,
    log_fn: LogFn,
    on_error: Option<OnErrorFn>,
    show_dialog: bool,
    listeners: Option<(ListenerId, ListenerId)>,
}

impl CaptureSession {
    fn new() -> Self {
        Self {
            state: CaptureState::Inactive,
            forward_to_renderers: true,
            log_fn: tracing_sink(),
            on_error: None,
            show_dialog: true,
            listeners: None,
        }
    }

    fn apply(&mut self, options: CaptureOptions) {
        if let Some(forward) = options.forward_to_renderers {
            self.forward_to_renderers = forward;
        }
        if let Some(log_fn) = options.log_fn {
            self.log_fn = log_fn;
        }
        if let Some(on_error) = options.on_error {
            self.on_error = Some(on_error);
        }
        if let Some(show_dialog) = options.show_dialog {
            self.show_dialog = show_dialog;
        }
    }

    fn context(&self, overrides: ReportOverrides) -> ReportContext {
        ReportContext::new(
            overrides.kind,
            overrides.role,
            overrides.log_fn.unwrap_or_else(|| Arc::clone(&self.log_fn)),
        )
        .with_on_error(overrides.on_error.or_else(|| self.on_error.clone()))
        .with_show_dialog(overrides.show_dialog.unwrap_or(self.show_dialog))
    }
}

struct CaptureInner {
    session: Mutex<CaptureSession>,
    events: Arc<HostEvents>,
    surfaces: Option<Arc<dyn SurfaceInjector>>,
    issues: IssueLinker,
    pipeline: ReportingPipeline,
}

impl CaptureInner {
    fn session(&self) -> MutexGuard<'_, CaptureSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CaptureInner {
    fn drop(&mut self) {
        let listeners = self.session().listeners.take();
        if let Some((uncaught, rejection)) = listeners {
            self.events.remove_listener(uncaught);
            self.events.remove_listener(rejection);
        }
    }
}

/// Process-wide error capture.
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct ErrorCapture {
    inner: Arc<CaptureInner>,
}

impl fmt::Debug for ErrorCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.inner.session();
        f.debug_struct("ErrorCapture")
            .field("state", &session.state)
            .field("forward_to_renderers", &session.forward_to_renderers)
            .field("on_error", &session.on_error.is_some())
            .field("show_dialog", &session.show_dialog)
            .finish()
    }
}

impl Default for ErrorCapture {
    fn default() -> Self {
        Self::new(CaptureOptions::default())
    }
}

impl ErrorCapture {
    /// An inactive capture using the default collaborators.
    pub fn new(options: CaptureOptions) -> Self {
        Self::with_collaborators(options, Collaborators::default())
    }

    pub fn with_collaborators(options: CaptureOptions, collaborators: Collaborators) -> Self {
        let Collaborators {
            events,
            platform,
            surfaces,
            fallback,
        } = collaborators;

        let mut session = CaptureSession::new();
        session.apply(options);

        Self {
            inner: Arc::new(CaptureInner {
                session: Mutex::new(session),
                events,
                surfaces,
                issues: IssueLinker::new(Arc::clone(&platform)),
                pipeline: ReportingPipeline::new(platform).with_fallback(fallback),
            }),
        }
    }

    /// Merge `options` into the session. Absent fields keep their values.
    pub fn set_options(&self, options: CaptureOptions) {
        self.inner.session().apply(options);
    }

    /// Attach the host listeners and, if enabled, inject the forwarding
    /// bridge into all current and future rendering surfaces.
    ///
    /// Returns `false` without side effects when already active.
    pub fn start_catching(&self, options: CaptureOptions) -> bool {
        let forward = {
            let mut session = self.inner.session();
            if session.state == CaptureState::Active {
                return false;
            }
            session.apply(options);

            let weak = Arc::downgrade(&self.inner);
            let uncaught = self.inner.events.add_listener(
                HostEventKind::UncaughtError,
                report_listener(weak.clone(), ReportKind::UncaughtError),
            );
            let rejection = self.inner.events.add_listener(
                HostEventKind::UnhandledRejection,
                report_listener(weak, ReportKind::UnhandledRejection),
            );
            session.listeners = Some((uncaught, rejection));
            session.state = CaptureState::Active;
            session.forward_to_renderers
        };

        tracing::debug!(target: "faultline.capture", forward, "error capture started");

        if forward {
            match &self.inner.surfaces {
                Some(surfaces) => surfaces.inject(
                    BridgeScript::error_forwarding(),
                    InjectionMode::ExistingAndFuture,
                ),
                None => tracing::debug!(
                    target: "faultline.capture",
                    "no surface injector configured; renderer forwarding skipped"
                ),
            }
        }
        true
    }

    /// Detach the host listeners. Returns `false` when already inactive.
    ///
    /// Forwarding listeners injected into rendering surfaces are not
    /// retracted.
    pub fn stop_catching(&self) -> bool {
        let listeners = {
            let mut session = self.inner.session();
            if session.state == CaptureState::Inactive {
                return false;
            }
            session.state = CaptureState::Inactive;
            session.listeners.take()
        };
        if let Some((uncaught, rejection)) = listeners {
            self.inner.events.remove_listener(uncaught);
            self.inner.events.remove_listener(rejection);
        }
        tracing::debug!(target: "faultline.capture", "error capture stopped");
        true
    }

    #[must_use]
    pub fn state(&self) -> CaptureState {
        self.inner.session().state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == CaptureState::Active
    }

    #[must_use]
    pub fn show_dialog(&self) -> bool {
        self.inner.session().show_dialog
    }

    #[must_use]
    pub fn forward_to_renderers(&self) -> bool {
        self.inner.session().forward_to_renderers
    }

    #[must_use]
    pub fn has_hook(&self) -> bool {
        self.inner.session().on_error.is_some()
    }

    /// The host event registry this capture attaches to.
    #[must_use]
    pub fn events(&self) -> &Arc<HostEvents> {
        &self.inner.events
    }

    /// Normalize `raw` and run it through the reporting pipeline.
    ///
    /// This is the single entry point for host listeners and for errors
    /// forwarded from rendering surfaces.
    #[track_caller]
    pub fn handle(&self, raw: Thrown, overrides: ReportOverrides) -> ReportOutcome {
        let error = normalize(raw);
        let ctx = {
            let session = self.inner.session();
            if session.state == CaptureState::Inactive {
                tracing::debug!(
                    target: "faultline.capture",
                    kind = ?overrides.kind,
                    "reporting while capture is inactive"
                );
            }
            session.context(overrides)
        };
        self.inner.pipeline.report(&error, &ctx)
    }

    /// Report as an uncaught error.
    #[track_caller]
    pub fn handle_error(&self, error: Thrown) -> ReportOutcome {
        self.handle(error, ReportOverrides::new(ReportKind::UncaughtError))
    }

    /// Report as an unhandled rejection.
    #[track_caller]
    pub fn handle_rejection(&self, reason: Thrown) -> ReportOutcome {
        self.handle(reason, ReportOverrides::new(ReportKind::UnhandledRejection))
    }

    /// Open an issue-tracker deep link through the platform.
    pub fn create_issue<K, V>(
        &self,
        page_url: &str,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> Result<(), CollaboratorError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.inner.issues.create_issue(page_url, params)
    }
}

fn report_listener(capture: Weak<CaptureInner>, kind: ReportKind) -> Listener {
    Arc::new(move |thrown: Thrown| {
        if let Some(inner) = capture.upgrade() {
            ErrorCapture { inner }.handle(thrown, ReportOverrides::new(kind.clone()));
        }
    })
}
