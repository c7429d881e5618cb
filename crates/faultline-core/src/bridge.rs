#![forbid(unsafe_code)]

//! Surface → host error forwarding.
//!
//! Rendering surfaces never share memory with the host's capture session.
//! Each surface is created with a [`SurfaceLink`], the sending half of a
//! message channel whose receiving half is the host's [`RendererBridge`].
//! Messages travel as JSON lines with a fixed schema:
//!
//! ```text
//! {"kind":"error","message":"...","stack":"..."}
//! {"kind":"rejection","message":"...","stack":"..."}
//! {"kind":"log","level":"info","text":"..."}
//! ```
//!
//! The forwarding listeners are installed by running
//! [`BridgeScript::error_forwarding`] inside each surface through a
//! [`SurfaceInjector`]. The script is guarded: it does nothing in a surface
//! that has no link, and it installs its listeners at most once per surface.

use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::{ErrorCapture, ReportOverrides};
use crate::error::BridgeError;
use crate::pipeline::{ProcessRole, ReportKind};
use crate::surface::{SurfaceEnv, SurfaceEvent};
use crate::thrown::{NormalizedError, Thrown, normalize};

/// Severity of a relayed surface log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// Wire schema of the surface → host channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BridgeMessage {
    Error { message: String, stack: String },
    Rejection { message: String, stack: String },
    Log { level: LogLevel, text: String },
}

impl BridgeMessage {
    #[must_use]
    pub fn error(error: &NormalizedError) -> Self {
        Self::Error {
            message: error.message().to_string(),
            stack: error.stack().to_string(),
        }
    }

    #[must_use]
    pub fn rejection(error: &NormalizedError) -> Self {
        Self::Rejection {
            message: error.message().to_string(),
            stack: error.stack().to_string(),
        }
    }

    pub fn encode(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(BridgeError::Encode)
    }

    pub fn decode(line: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(line).map_err(BridgeError::Decode)
    }
}

/// A log line relayed from a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererLog {
    pub level: LogLevel,
    pub text: String,
}

/// Sending half of the bridge, held by a rendering surface.
#[derive(Debug, Clone)]
pub struct SurfaceLink {
    tx: mpsc::Sender<String>,
}

impl SurfaceLink {
    pub fn send(&self, message: &BridgeMessage) -> Result<(), BridgeError> {
        let line = message.encode()?;
        self.tx.send(line).map_err(|_| BridgeError::Disconnected)
    }

    /// Relay an ordinary log line to the host.
    pub fn log(&self, level: LogLevel, text: impl Into<String>) -> Result<(), BridgeError> {
        self.send(&BridgeMessage::Log {
            level,
            text: text.into(),
        })
    }
}

/// Receiving half of the bridge, owned by the host.
#[derive(Debug)]
pub struct RendererBridge {
    rx: Mutex<mpsc::Receiver<String>>,
    tx: mpsc::Sender<String>,
}

impl Default for RendererBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererBridge {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            rx: Mutex::new(rx),
            tx,
        }
    }

    /// A link to hand to a new rendering surface.
    #[must_use]
    pub fn link(&self) -> SurfaceLink {
        SurfaceLink {
            tx: self.tx.clone(),
        }
    }

    /// Dispatch every message already queued. Returns how many were handled.
    ///
    /// Errors and rejections go to `capture`; log lines go to `on_log`.
    pub fn pump(&self, capture: &ErrorCapture, mut on_log: impl FnMut(RendererLog)) -> usize {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut handled = 0;
        loop {
            match rx.try_recv() {
                Ok(line) => {
                    handled += usize::from(dispatch_line(&line, capture, &mut on_log));
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return handled,
            }
        }
    }

    /// Wait up to `timeout` for one message and dispatch it.
    ///
    /// Returns `true` if a message was handled.
    pub fn recv_timeout(
        &self,
        capture: &ErrorCapture,
        timeout: Duration,
        mut on_log: impl FnMut(RendererLog),
    ) -> bool {
        let line = {
            let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
            match rx.recv_timeout(timeout) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return false,
            }
        };
        dispatch_line(&line, capture, &mut on_log)
    }
}

/// A host inbox together with a first link for a surface.
#[must_use]
pub fn channel() -> (SurfaceLink, RendererBridge) {
    let bridge = RendererBridge::new();
    (bridge.link(), bridge)
}

fn dispatch_line(
    line: &str,
    capture: &ErrorCapture,
    on_log: &mut impl FnMut(RendererLog),
) -> bool {
    let message = match BridgeMessage::decode(line) {
        Ok(message) => message,
        Err(error) => {
            tracing::warn!(target: "faultline.bridge", %error, "dropping malformed bridge message");
            return false;
        }
    };

    match message {
        BridgeMessage::Error { message, stack } => {
            capture.handle(
                Thrown::shaped(message, stack),
                ReportOverrides::new(ReportKind::UncaughtError).with_role(ProcessRole::Renderer),
            );
        }
        BridgeMessage::Rejection { message, stack } => {
            capture.handle(
                Thrown::shaped(message, stack),
                ReportOverrides::new(ReportKind::UnhandledRejection)
                    .with_role(ProcessRole::Renderer),
            );
        }
        BridgeMessage::Log { level, text } => on_log(RendererLog { level, text }),
    }
    true
}

/// Which surfaces an injected script runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionMode {
    /// Every surface that exists now.
    Existing,
    /// Every surface that exists now and every surface created later.
    ExistingAndFuture,
}

/// Something that can run a [`BridgeScript`] inside rendering surfaces.
pub trait SurfaceInjector: Send + Sync {
    /// Fire-and-forget.
    fn inject(&self, script: BridgeScript, mode: InjectionMode);
}

/// A small program executed inside a rendering surface.
#[derive(Clone, Copy)]
pub struct BridgeScript {
    name: &'static str,
    body: fn(&mut SurfaceEnv),
}

impl std::fmt::Debug for BridgeScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeScript")
            .field("name", &self.name)
            .finish()
    }
}

impl BridgeScript {
    /// Installs listeners that forward surface errors and rejections to the
    /// host and prevent the surface's default handling.
    #[must_use]
    pub fn error_forwarding() -> Self {
        Self {
            name: "faultline.error-forwarding",
            body: install_error_forwarding,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the script in `env`. A script runs at most once per surface.
    pub fn run(&self, env: &mut SurfaceEnv) {
        if env.mark_installed(self.name) {
            (self.body)(env);
        }
    }
}

fn install_error_forwarding(env: &mut SurfaceEnv) {
    let Some(link) = env.log_handle().cloned() else {
        return;
    };
    let surface = env.id();

    let errors = link.clone();
    env.add_error_listener(move |event: &mut SurfaceEvent| {
        event.prevent_default();
        let error = normalize(event.payload().clone());
        if let Err(send_error) = errors.send(&BridgeMessage::error(&error)) {
            tracing::warn!(target: "faultline.bridge", %surface, %send_error, "error not forwarded");
        }
    });

    env.add_rejection_listener(move |event: &mut SurfaceEvent| {
        event.prevent_default();
        let error = normalize(event.payload().clone());
        if let Err(send_error) = link.send(&BridgeMessage::rejection(&error)) {
            tracing::warn!(target: "faultline.bridge", %surface, %send_error, "rejection not forwarded");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Surfaces;

    #[test]
    fn wire_schema_is_tagged_by_kind() {
        let message = BridgeMessage::Error {
            message: "boom".to_string(),
            stack: "Error: boom".to_string(),
        };
        assert_eq!(
            message.encode().expect("encode"),
            r#"{"kind":"error","message":"boom","stack":"Error: boom"}"#
        );

        let log = BridgeMessage::decode(r#"{"kind":"log","level":"info","text":"hi"}"#)
            .expect("decode log");
        assert_eq!(
            log,
            BridgeMessage::Log {
                level: LogLevel::Info,
                text: "hi".to_string()
            }
        );
    }

    #[test]
    fn unknown_kind_is_a_decode_error() {
        let error = BridgeMessage::decode(r#"{"kind":"exit","code":1}"#).expect_err("unknown kind");
        assert!(matches!(error, BridgeError::Decode(_)));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let (link, bridge) = channel();
        link.tx.send("not json".to_string()).unwrap();
        link.log(LogLevel::Warn, "still here").unwrap();
        let capture = crate::capture::ErrorCapture::with_collaborators(
            crate::config::CaptureOptions::new(),
            crate::capture::Collaborators::headless(),
        );

        let mut logs = Vec::new();
        assert_eq!(bridge.pump(&capture, |log| logs.push(log)), 1);
        assert_eq!(
            logs,
            vec![RendererLog {
                level: LogLevel::Warn,
                text: "still here".to_string()
            }]
        );
    }

    #[test]
    fn script_is_a_no_op_without_log_handle() {
        let surfaces = Surfaces::new();
        let surface = surfaces.create(None);
        surface.execute(&BridgeScript::error_forwarding());
        assert_eq!(surface.listener_counts(), (0, 0));
    }

    #[test]
    fn script_installs_listeners_once() {
        let bridge = RendererBridge::new();
        let surfaces = Surfaces::new();
        let surface = surfaces.create(Some(bridge.link()));
        let script = BridgeScript::error_forwarding();

        surface.execute(&script);
        surface.execute(&script);

        assert_eq!(surface.listener_counts(), (1, 1));
    }

    #[test]
    fn forwarded_error_prevents_surface_default() {
        let bridge = RendererBridge::new();
        let surfaces = Surfaces::new();
        let surface = surfaces.create(Some(bridge.link()));
        surface.execute(&BridgeScript::error_forwarding());

        assert!(surface.raise_error(Thrown::from("render failed")));
        assert!(surface.raise_rejection(Thrown::raw(false)));

        let rx = bridge.rx.lock().unwrap();
        let first = BridgeMessage::decode(&rx.try_recv().expect("error message")).unwrap();
        let second = BridgeMessage::decode(&rx.try_recv().expect("rejection message")).unwrap();
        assert!(matches!(first, BridgeMessage::Error { ref message, .. } if message == "render failed"));
        assert!(matches!(second, BridgeMessage::Rejection { ref message, .. } if message == "false"));
    }
}
