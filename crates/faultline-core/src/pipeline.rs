#![forbid(unsafe_code)]

//! Reporting pipeline.
//!
//! One report runs three steps, strictly in order, on the calling thread:
//!
//! 1. **Override hook** (optional). Receives the error, the platform
//!    versions and an [`IssueLinker`]. Returning [`HookOutcome::Handled`]
//!    ends the report: no log entry, no dialog.
//! 2. **Log sink**. Called with the report label (when non-empty) and the
//!    error.
//! 3. **Dialog** (optional). Shown only when enabled and the report is not
//!    an unhandled rejection.
//!
//! # Failure handling
//!
//! The steps are collaborators and may fail, either by returning `Err` or by
//! panicking. Any such failure ends the report: the original,
//! pre-normalization value is written to the fallback channel (stderr by
//! default) and [`ReportingPipeline::report`] returns. The pipeline never
//! propagates a failure and never re-enters itself.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use crate::error::{CollaboratorError, PipelineFailure};
use crate::host_events::catch_panic;
use crate::issue::IssueLinker;
use crate::platform::{Platform, Versions};
use crate::thrown::{NormalizedError, Thrown};

/// Log sink: `(label, error)`. The label is `None` for unlabeled reports.
pub type LogFn =
    Arc<dyn Fn(Option<&str>, &NormalizedError) -> Result<(), CollaboratorError> + Send + Sync>;

/// Override hook consulted before default handling.
pub type OnErrorFn =
    Arc<dyn Fn(&HookArgs<'_>) -> Result<HookOutcome, CollaboratorError> + Send + Sync>;

/// Last-resort diagnostic channel for handler-internal failures.
pub type FallbackFn = Arc<dyn Fn(&Thrown) + Send + Sync>;

/// Label of reports raised by the uncaught-error listener.
pub const UNCAUGHT_LABEL: &str = "Unhandled";
/// Label of reports raised by the unhandled-rejection listener.
pub const REJECTION_LABEL: &str = "Unhandled rejection";

/// What kind of failure is being reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportKind {
    UncaughtError,
    UnhandledRejection,
    /// A report raised directly by the application, with an optional label.
    Other(Option<String>),
}

impl Default for ReportKind {
    fn default() -> Self {
        Self::Other(None)
    }
}

impl ReportKind {
    /// Label passed to the log sink. Empty for unlabeled reports.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::UncaughtError => UNCAUGHT_LABEL,
            Self::UnhandledRejection => REJECTION_LABEL,
            Self::Other(label) => label.as_deref().unwrap_or(""),
        }
    }

    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::UnhandledRejection)
    }
}

/// Which process the error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessRole {
    #[default]
    Host,
    Renderer,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Renderer => "renderer",
        })
    }
}

/// Decision returned by the override hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Continue with the log sink and dialog.
    Continue,
    /// The hook handled the error; skip everything else.
    Handled,
}

/// Arguments handed to the override hook.
pub struct HookArgs<'a> {
    pub error: &'a NormalizedError,
    pub versions: &'a Versions,
    pub issues: &'a IssueLinker,
}

impl HookArgs<'_> {
    /// Shorthand for `issues.create_issue(...)`.
    pub fn create_issue<K, V>(
        &self,
        page_url: &str,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> Result<(), CollaboratorError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.issues.create_issue(page_url, params)
    }
}

/// Resolved configuration for exactly one report.
#[derive(Clone)]
pub struct ReportContext {
    kind: ReportKind,
    role: ProcessRole,
    log_fn: LogFn,
    on_error: Option<OnErrorFn>,
    show_dialog: bool,
}

impl fmt::Debug for ReportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportContext")
            .field("kind", &self.kind)
            .field("role", &self.role)
            .field("on_error", &self.on_error.is_some())
            .field("show_dialog", &self.show_dialog)
            .finish()
    }
}

impl ReportContext {
    /// A context with no hook and the dialog enabled.
    pub fn new(kind: ReportKind, role: ProcessRole, log_fn: LogFn) -> Self {
        Self {
            kind,
            role,
            log_fn,
            on_error: None,
            show_dialog: true,
        }
    }

    #[must_use]
    pub fn with_on_error(mut self, on_error: Option<OnErrorFn>) -> Self {
        self.on_error = on_error;
        self
    }

    #[must_use]
    pub fn with_show_dialog(mut self, show_dialog: bool) -> Self {
        self.show_dialog = show_dialog;
        self
    }

    #[must_use]
    pub fn kind(&self) -> &ReportKind {
        &self.kind
    }

    #[must_use]
    pub fn role(&self) -> ProcessRole {
        self.role
    }

    #[must_use]
    pub fn show_dialog(&self) -> bool {
        self.show_dialog
    }

    #[must_use]
    pub fn has_hook(&self) -> bool {
        self.on_error.is_some()
    }
}

/// How a report ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Logged; `dialog_shown` tells whether the dialog was requested.
    Reported { dialog_shown: bool },
    /// The override hook returned [`HookOutcome::Handled`].
    HandledByHook,
    /// A step failed and the original error went to the fallback channel.
    Fallback,
}

/// The hook → log → dialog sequence.
pub struct ReportingPipeline {
    platform: Arc<dyn Platform>,
    issues: IssueLinker,
    fallback: FallbackFn,
}

impl fmt::Debug for ReportingPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportingPipeline").finish_non_exhaustive()
    }
}

impl ReportingPipeline {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            issues: IssueLinker::new(Arc::clone(&platform)),
            platform,
            fallback: stderr_fallback(),
        }
    }

    /// Replace the fallback channel.
    #[must_use]
    pub fn with_fallback(mut self, fallback: FallbackFn) -> Self {
        self.fallback = fallback;
        self
    }

    /// Run one report. Never panics and never returns an error.
    pub fn report(&self, error: &NormalizedError, ctx: &ReportContext) -> ReportOutcome {
        let failure = match catch_panic(|| self.run_steps(error, ctx)) {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(failure)) => failure,
            Err(panicked) => PipelineFailure::Panicked(describe(&panicked)),
        };

        let original = error.original();
        let _ = catch_panic(|| {
            tracing::debug!(
                target: "faultline.pipeline",
                failure = %failure,
                "reporting failed, writing to fallback channel"
            );
            (self.fallback)(original);
        });
        ReportOutcome::Fallback
    }

    fn run_steps(
        &self,
        error: &NormalizedError,
        ctx: &ReportContext,
    ) -> Result<ReportOutcome, PipelineFailure> {
        if let Some(on_error) = &ctx.on_error {
            let versions = self.platform.versions();
            let args = HookArgs {
                error,
                versions: &versions,
                issues: &self.issues,
            };
            if on_error(&args).map_err(PipelineFailure::Hook)? == HookOutcome::Handled {
                return Ok(ReportOutcome::HandledByHook);
            }
        }

        let label = ctx.kind.label();
        let label = (!label.is_empty()).then_some(label);
        (ctx.log_fn)(label, error).map_err(PipelineFailure::Sink)?;

        if !ctx.show_dialog || ctx.kind.is_rejection() {
            return Ok(ReportOutcome::Reported {
                dialog_shown: false,
            });
        }
        let title = dialog_title(ctx.role);
        self.platform
            .show_error_box(&title, error.stack())
            .map_err(PipelineFailure::Dialog)?;
        Ok(ReportOutcome::Reported { dialog_shown: true })
    }
}

/// Title of the failure dialog for errors from `role`.
#[must_use]
pub fn dialog_title(role: ProcessRole) -> String {
    format!("An error occurred in the {role} process")
}

/// Fallback that writes the original value to stderr, ignoring write errors.
pub fn stderr_fallback() -> FallbackFn {
    Arc::new(|original: &Thrown| {
        let _ = writeln!(io::stderr().lock(), "{original}");
    })
}

fn describe(thrown: &Thrown) -> String {
    match thrown {
        Thrown::Shaped { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HeadlessPlatform;
    use crate::thrown::normalize;
    use std::sync::Mutex;

    struct FailingDialogs;

    impl Platform for FailingDialogs {
        fn versions(&self) -> Versions {
            Versions::default()
        }

        fn show_error_box(&self, _title: &str, _body: &str) -> Result<(), CollaboratorError> {
            Err("no display".into())
        }

        fn open_url(&self, _url: &str) -> Result<(), CollaboratorError> {
            Ok(())
        }
    }

    type Calls = Arc<Mutex<Vec<String>>>;

    fn recording_log() -> (Calls, LogFn) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let log_fn: LogFn = Arc::new(move |label, error| {
            let line = match label {
                Some(label) => format!("{label}: {}", error.message()),
                None => error.message().to_string(),
            };
            sink.lock().unwrap().push(line);
            Ok(())
        });
        (calls, log_fn)
    }

    fn recording_fallback() -> (Calls, FallbackFn) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let fallback: FallbackFn = Arc::new(move |original| {
            sink.lock().unwrap().push(original.to_string());
        });
        (calls, fallback)
    }

    fn pipeline() -> (Arc<HeadlessPlatform>, ReportingPipeline) {
        let platform = Arc::new(HeadlessPlatform::new());
        let pipeline = ReportingPipeline::new(platform.clone());
        (platform, pipeline)
    }

    #[test]
    fn default_kind_is_unlabeled_and_shows_dialog() {
        let (platform, pipeline) = pipeline();
        let (calls, log_fn) = recording_log();
        assert_eq!(ReportKind::default(), ReportKind::Other(None));
        let ctx = ReportContext::new(ReportKind::default(), ProcessRole::default(), log_fn);

        pipeline.report(&normalize(Thrown::from("direct")), &ctx);

        assert_eq!(*calls.lock().unwrap(), vec!["direct".to_string()]);
        assert_eq!(platform.dialogs().len(), 1);
    }

    #[test]
    fn labels_follow_report_kind() {
        assert_eq!(ReportKind::UncaughtError.label(), "Unhandled");
        assert_eq!(ReportKind::UnhandledRejection.label(), "Unhandled rejection");
        assert_eq!(ReportKind::Other(None).label(), "");
        assert_eq!(ReportKind::Other(Some("Startup".into())).label(), "Startup");
    }

    #[test]
    fn logs_with_label_and_shows_dialog() {
        let (platform, pipeline) = pipeline();
        let (calls, log_fn) = recording_log();
        let error = normalize(Thrown::shaped("boom", "Error: boom\n    at main.rs:3:1"));
        let ctx = ReportContext::new(ReportKind::UncaughtError, ProcessRole::Host, log_fn);

        let outcome = pipeline.report(&error, &ctx);

        assert_eq!(outcome, ReportOutcome::Reported { dialog_shown: true });
        assert_eq!(*calls.lock().unwrap(), vec!["Unhandled: boom".to_string()]);
        assert_eq!(
            platform.dialogs(),
            vec![(
                "An error occurred in the host process".to_string(),
                "Error: boom\n    at main.rs:3:1".to_string()
            )]
        );
    }

    #[test]
    fn unlabeled_report_logs_error_alone() {
        let (_, pipeline) = pipeline();
        let (calls, log_fn) = recording_log();
        let ctx = ReportContext::new(ReportKind::Other(None), ProcessRole::Host, log_fn)
            .with_show_dialog(false);

        pipeline.report(&normalize(Thrown::from("plain")), &ctx);

        assert_eq!(*calls.lock().unwrap(), vec!["plain".to_string()]);
    }

    #[test]
    fn rejections_never_show_a_dialog() {
        let (platform, pipeline) = pipeline();
        let (calls, log_fn) = recording_log();
        let ctx = ReportContext::new(ReportKind::UnhandledRejection, ProcessRole::Host, log_fn)
            .with_show_dialog(true);

        let outcome = pipeline.report(&normalize(Thrown::raw(42)), &ctx);

        assert_eq!(outcome, ReportOutcome::Reported { dialog_shown: false });
        assert_eq!(*calls.lock().unwrap(), vec!["Unhandled rejection: 42".to_string()]);
        assert!(platform.dialogs().is_empty());
    }

    #[test]
    fn renderer_role_is_named_in_dialog_title() {
        let (platform, pipeline) = pipeline();
        let (_, log_fn) = recording_log();
        let ctx = ReportContext::new(ReportKind::UncaughtError, ProcessRole::Renderer, log_fn);

        pipeline.report(&normalize(Thrown::from("x")), &ctx);

        assert_eq!(
            platform.dialogs()[0].0,
            "An error occurred in the renderer process"
        );
    }

    #[test]
    fn handled_hook_suppresses_log_and_dialog() {
        let (platform, pipeline) = pipeline();
        let (calls, log_fn) = recording_log();
        let hook: OnErrorFn = Arc::new(|_| Ok(HookOutcome::Handled));
        let ctx = ReportContext::new(ReportKind::UncaughtError, ProcessRole::Host, log_fn)
            .with_on_error(Some(hook));

        let outcome = pipeline.report(&normalize(Thrown::from("quiet")), &ctx);

        assert_eq!(outcome, ReportOutcome::HandledByHook);
        assert!(calls.lock().unwrap().is_empty());
        assert!(platform.dialogs().is_empty());
    }

    #[test]
    fn continuing_hook_sees_versions_and_can_file_issue() {
        let (platform, pipeline) = pipeline();
        let (calls, log_fn) = recording_log();
        let hook: OnErrorFn = Arc::new(|args| {
            assert!(args.versions.get("faultline").is_some());
            args.create_issue(
                "https://example.com/issues/new",
                [("title", args.error.message())],
            )?;
            Ok(HookOutcome::Continue)
        });
        let ctx = ReportContext::new(ReportKind::UncaughtError, ProcessRole::Host, log_fn)
            .with_on_error(Some(hook))
            .with_show_dialog(false);

        pipeline.report(&normalize(Thrown::from("bad state")), &ctx);

        assert_eq!(
            platform.opened_urls(),
            vec!["https://example.com/issues/new?title=bad+state"]
        );
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn failing_sink_falls_back_to_original_value() {
        let (fallback_calls, fallback) = recording_fallback();
        let (platform, pipeline) = pipeline();
        let pipeline = pipeline.with_fallback(fallback);
        let log_fn: LogFn = Arc::new(|_, _| Err("sink offline".into()));
        let ctx = ReportContext::new(ReportKind::UncaughtError, ProcessRole::Host, log_fn);

        let outcome = pipeline.report(&normalize(Thrown::raw("reason")), &ctx);

        assert_eq!(outcome, ReportOutcome::Fallback);
        assert_eq!(*fallback_calls.lock().unwrap(), vec!["\"reason\"".to_string()]);
        assert!(platform.dialogs().is_empty());
    }

    #[test]
    fn panicking_hook_and_sink_fall_back() {
        let (fallback_calls, fallback) = recording_fallback();
        let (_, pipeline) = pipeline();
        let pipeline = pipeline.with_fallback(fallback);
        let log_fn: LogFn = Arc::new(|_, _| panic!("sink exploded"));
        let hook: OnErrorFn = Arc::new(|_| panic!("hook exploded"));
        let ctx = ReportContext::new(ReportKind::UncaughtError, ProcessRole::Host, log_fn)
            .with_on_error(Some(hook));

        let outcome = pipeline.report(&normalize(Thrown::shaped("root cause", "stack text")), &ctx);

        assert_eq!(outcome, ReportOutcome::Fallback);
        assert_eq!(*fallback_calls.lock().unwrap(), vec!["stack text".to_string()]);
    }

    #[test]
    fn failing_dialog_falls_back_after_logging() {
        let (fallback_calls, fallback) = recording_fallback();
        let pipeline = ReportingPipeline::new(Arc::new(FailingDialogs)).with_fallback(fallback);
        let (calls, log_fn) = recording_log();
        let ctx = ReportContext::new(ReportKind::UncaughtError, ProcessRole::Host, log_fn);

        let outcome = pipeline.report(&normalize(Thrown::from("visible")), &ctx);

        assert_eq!(outcome, ReportOutcome::Fallback);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(fallback_calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn panicking_fallback_is_swallowed() {
        let (_, pipeline) = pipeline();
        let pipeline = pipeline.with_fallback(Arc::new(|_| panic!("stderr gone")));
        let log_fn: LogFn = Arc::new(|_, _| Err("sink offline".into()));
        let ctx = ReportContext::new(ReportKind::UncaughtError, ProcessRole::Host, log_fn);

        assert_eq!(
            pipeline.report(&normalize(Thrown::from("x")), &ctx),
            ReportOutcome::Fallback
        );
    }
}
