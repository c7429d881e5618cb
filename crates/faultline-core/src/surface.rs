#![forbid(unsafe_code)]

//! In-process rendering surfaces.
//!
//! A [`Surface`] is a sandboxed execution context: it runs untrusted UI work
//! on its own thread, has its own error and rejection listeners, and talks
//! to the host only through the optional [`SurfaceLink`] it was created
//! with. [`Surfaces`] is the registry that creates surfaces and implements
//! [`SurfaceInjector`], so scripts injected with
//! [`InjectionMode::ExistingAndFuture`] also run in surfaces created later.
//!
//! An error event that no listener prevented falls through to the surface's
//! default handling, which prints it to the surface console (stderr).

use std::error::Error;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::bridge::{BridgeScript, InjectionMode, LogLevel, SurfaceInjector, SurfaceLink};
use crate::error::BridgeError;
use crate::host_events::catch_panic;
use crate::thrown::Thrown;

/// Listener registered inside a surface.
pub type SurfaceListener = Arc<dyn Fn(&mut SurfaceEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// An error or rejection raised inside a surface.
#[derive(Debug)]
pub struct SurfaceEvent {
    payload: Thrown,
    default_prevented: bool,
}

impl SurfaceEvent {
    #[must_use]
    pub fn payload(&self) -> &Thrown {
        &self.payload
    }

    /// Suppress the surface's own handling of this event.
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

/// The environment scripts see when they run inside a surface.
pub struct SurfaceEnv {
    id: SurfaceId,
    log_handle: Option<SurfaceLink>,
    error_listeners: Vec<SurfaceListener>,
    rejection_listeners: Vec<SurfaceListener>,
    installed: Vec<&'static str>,
}

impl fmt::Debug for SurfaceEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceEnv")
            .field("id", &self.id)
            .field("log_handle", &self.log_handle.is_some())
            .field("error_listeners", &self.error_listeners.len())
            .field("rejection_listeners", &self.rejection_listeners.len())
            .field("installed", &self.installed)
            .finish()
    }
}

impl SurfaceEnv {
    #[must_use]
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// The logging handle the host established for this surface, if any.
    #[must_use]
    pub fn log_handle(&self) -> Option<&SurfaceLink> {
        self.log_handle.as_ref()
    }

    pub fn add_error_listener(
        &mut self,
        listener: impl Fn(&mut SurfaceEvent) + Send + Sync + 'static,
    ) {
        self.error_listeners.push(Arc::new(listener));
    }

    pub fn add_rejection_listener(
        &mut self,
        listener: impl Fn(&mut SurfaceEvent) + Send + Sync + 'static,
    ) {
        self.rejection_listeners.push(Arc::new(listener));
    }

    /// Record that the script `name` ran here. Returns `false` if it already had.
    pub(crate) fn mark_installed(&mut self, name: &'static str) -> bool {
        if self.installed.contains(&name) {
            return false;
        }
        self.installed.push(name);
        true
    }
}

#[derive(Debug, Clone, Copy)]
enum EventKind {
    Error,
    Rejection,
}

/// A rendering surface.
#[derive(Debug)]
pub struct Surface {
    id: SurfaceId,
    env: Mutex<SurfaceEnv>,
}

impl Surface {
    fn new(id: SurfaceId, log_handle: Option<SurfaceLink>) -> Self {
        Self {
            id,
            env: Mutex::new(SurfaceEnv {
                id,
                log_handle,
                error_listeners: Vec::new(),
                rejection_listeners: Vec::new(),
                installed: Vec::new(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// Run a script in this surface. A panicking script is contained.
    pub fn execute(&self, script: &BridgeScript) {
        let mut env = self.env();
        if let Err(panicked) = catch_panic(|| script.run(&mut env)) {
            tracing::warn!(
                target: "faultline.surface",
                surface = %self.id,
                script = script.name(),
                %panicked,
                "injected script failed"
            );
        }
    }

    /// Raise a synchronous error. Returns `true` if a listener prevented
    /// the default handling.
    pub fn raise_error(&self, error: Thrown) -> bool {
        self.dispatch(EventKind::Error, error)
    }

    /// Raise an unhandled rejection. Returns `true` if a listener prevented
    /// the default handling.
    pub fn raise_rejection(&self, reason: Thrown) -> bool {
        self.dispatch(EventKind::Rejection, reason)
    }

    /// Log a line through the surface's handle, or to its console when it
    /// has none.
    pub fn log(&self, level: LogLevel, text: &str) -> Result<(), BridgeError> {
        let link = self.env().log_handle.clone();
        match link {
            Some(link) => link.log(level, text),
            None => {
                let _ = writeln!(io::stderr().lock(), "[{}] [{}] {text}", self.id, level.as_str());
                Ok(())
            }
        }
    }

    /// Number of `(error, rejection)` listeners currently installed.
    #[must_use]
    pub fn listener_counts(&self) -> (usize, usize) {
        let env = self.env();
        (env.error_listeners.len(), env.rejection_listeners.len())
    }

    /// Run `task` on the surface's own thread.
    ///
    /// A panic in the task is raised as a surface error; an `Err` it returns
    /// is raised as a surface rejection.
    pub fn run<F, E>(self: &Arc<Self>, task: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce(&Surface) -> Result<(), E> + Send + 'static,
        E: Error + 'static,
    {
        let surface = Arc::clone(self);
        std::thread::Builder::new()
            .name(self.id.to_string())
            .spawn(move || match catch_panic(|| task(&surface)) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    surface.raise_rejection(Thrown::from_error(&error));
                }
                Err(panicked) => {
                    surface.raise_error(panicked);
                }
            })
    }

    fn dispatch(&self, kind: EventKind, payload: Thrown) -> bool {
        let listeners: Vec<SurfaceListener> = {
            let env = self.env();
            match kind {
                EventKind::Error => env.error_listeners.clone(),
                EventKind::Rejection => env.rejection_listeners.clone(),
            }
        };

        let mut event = SurfaceEvent {
            payload,
            default_prevented: false,
        };
        for listener in listeners {
            if let Err(panicked) = catch_panic(|| listener(&mut event)) {
                tracing::warn!(target: "faultline.surface", surface = %self.id, %panicked, "surface listener failed");
            }
        }

        if event.default_prevented {
            return true;
        }
        let what = match kind {
            EventKind::Error => "Uncaught error",
            EventKind::Rejection => "Uncaught (in promise)",
        };
        let _ = writeln!(io::stderr().lock(), "[{}] {what}: {}", self.id, event.payload);
        false
    }

    fn env(&self) -> MutexGuard<'_, SurfaceEnv> {
        self.env.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct SurfacesInner {
    surfaces: Vec<Arc<Surface>>,
    persistent: Vec<BridgeScript>,
    next_id: u64,
}

/// Registry of rendering surfaces.
#[derive(Debug, Default)]
pub struct Surfaces {
    inner: Mutex<SurfacesInner>,
}

impl Surfaces {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a surface. Scripts injected for future surfaces run in it
    /// before it is returned.
    pub fn create(&self, log_handle: Option<SurfaceLink>) -> Arc<Surface> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let surface = Arc::new(Surface::new(SurfaceId(inner.next_id), log_handle));
        for script in &inner.persistent {
            surface.execute(script);
        }
        inner.surfaces.push(Arc::clone(&surface));
        tracing::debug!(target: "faultline.surface", surface = %surface.id, "surface created");
        surface
    }

    /// Remove a surface from the registry. Returns `false` if unknown.
    pub fn close(&self, id: SurfaceId) -> bool {
        let mut inner = self.lock();
        let before = inner.surfaces.len();
        inner.surfaces.retain(|surface| surface.id != id);
        inner.surfaces.len() != before
    }

    #[must_use]
    pub fn surfaces(&self) -> Vec<Arc<Surface>> {
        self.lock().surfaces.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().surfaces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().surfaces.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, SurfacesInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SurfaceInjector for Surfaces {
    fn inject(&self, script: BridgeScript, mode: InjectionMode) {
        let mut inner = self.lock();
        for surface in &inner.surfaces {
            surface.execute(&script);
        }
        if mode == InjectionMode::ExistingAndFuture
            && !inner.persistent.iter().any(|s| s.name() == script.name())
        {
            inner.persistent.push(script);
        }
        tracing::debug!(
            target: "faultline.surface",
            script = script.name(),
            ?mode,
            surfaces = inner.surfaces.len(),
            "script injected"
        );
    }
}
