#![forbid(unsafe_code)]

//! Host-process error events.
//!
//! Rust has no event emitter for "uncaught error" or "unhandled rejection",
//! so this module provides one:
//!
//! - **Uncaught errors** are panics. A panic hook is installed once per
//!   process ([`install_panic_hook`]); it forwards every panic to the
//!   listeners registered on [`HostEvents::global`]. With no listener
//!   attached, the previously installed hook runs as usual.
//! - **Unhandled rejections** are failures of detached work that nobody
//!   observes. [`HostEvents::spawn_detached`] runs a fallible task on its own
//!   thread and emits its `Err` as a rejection; other executors can call
//!   [`HostEvents::emit_unhandled_rejection`] directly.
//!
//! # Panics inside listeners
//!
//! A panic raised while the panic hook itself is running aborts the process.
//! The hook therefore runs the uncaught listeners on a scoped reporting
//! thread and joins it, so a listener that panics unwinds normally and is
//! caught. [`catch_panic`] marks the current thread so that panics it
//! catches are stashed silently instead of being dispatched again.
//!
//! # Recovering from a panic
//!
//! The hook runs before unwinding starts, so it cannot know whether some
//! frame further up will catch the panic. A panic recovered with plain
//! [`std::panic::catch_unwind`] (thread pools and async executors do this
//! for task panics) is still reported as an uncaught error: it is logged,
//! the dialog is shown, and the previous hook does not run. Recover with
//! [`catch_panic`] instead to keep a panic out of the report.

use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::JoinHandle;

use crate::thrown::Thrown;

/// Callback attached to a host event.
pub type Listener = Arc<dyn Fn(Thrown) + Send + Sync>;

/// The two process-level error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEventKind {
    UncaughtError,
    UnhandledRejection,
}

/// Handle returned by [`HostEvents::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static GLOBAL: OnceLock<Arc<HostEvents>> = OnceLock::new();

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static STASHED_PANIC: RefCell<Option<Thrown>> = const { RefCell::new(None) };
}

/// Listener registry for the host process.
pub struct HostEvents {
    listeners: Mutex<Vec<(ListenerId, HostEventKind, Listener)>>,
    next_id: AtomicU64,
}

impl fmt::Debug for HostEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostEvents")
            .field("uncaught", &self.listener_count(HostEventKind::UncaughtError))
            .field(
                "rejection",
                &self.listener_count(HostEventKind::UnhandledRejection),
            )
            .finish()
    }
}

impl Default for HostEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl HostEvents {
    /// A standalone registry. Panics are only routed to [`HostEvents::global`];
    /// a standalone registry receives uncaught errors through
    /// [`HostEvents::emit_uncaught`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The process-wide registry wired to the panic hook.
    pub fn global() -> Arc<Self> {
        GLOBAL
            .get_or_init(|| {
                install_panic_hook();
                Arc::new(Self::new())
            })
            .clone()
    }

    pub fn add_listener(&self, kind: HostEventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, kind, listener));
        tracing::debug!(target: "faultline.events", ?kind, id = id.0, "listener attached");
        id
    }

    /// Detach a listener. Returns `false` if it was not attached.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _, _)| *existing != id);
        let removed = listeners.len() != before;
        if removed {
            tracing::debug!(target: "faultline.events", id = id.0, "listener detached");
        }
        removed
    }

    #[must_use]
    pub fn listener_count(&self, kind: HostEventKind) -> usize {
        self.lock().iter().filter(|(_, k, _)| *k == kind).count()
    }

    /// Deliver an uncaught error. Returns `false` when nobody listens.
    pub fn emit_uncaught(&self, error: Thrown) -> bool {
        self.dispatch(HostEventKind::UncaughtError, error)
    }

    /// Deliver an unhandled rejection.
    ///
    /// Without listeners the reason is written to stderr and `false` is
    /// returned.
    pub fn emit_unhandled_rejection(&self, reason: Thrown) -> bool {
        if self.dispatch(HostEventKind::UnhandledRejection, reason.clone()) {
            return true;
        }
        let _ = writeln!(io::stderr().lock(), "Unhandled rejection: {reason}");
        false
    }

    /// Run a fallible task on a detached thread.
    ///
    /// The task's `Err` is nobody's to observe, so it is emitted as an
    /// unhandled rejection on this registry.
    pub fn spawn_detached<F, E>(
        self: &Arc<Self>,
        name: impl Into<String>,
        task: F,
    ) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Error + Send + 'static,
    {
        let events = Arc::clone(self);
        std::thread::Builder::new().name(name.into()).spawn(move || {
            if let Err(error) = task() {
                events.emit_unhandled_rejection(Thrown::from_error(&error));
            }
        })
    }

    fn dispatch(&self, kind: HostEventKind, error: Thrown) -> bool {
        let listeners: Vec<Listener> = self
            .lock()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();
        if listeners.is_empty() {
            return false;
        }

        for listener in listeners {
            let payload = error.clone();
            if let Err(panicked) = catch_panic(move || listener(payload)) {
                let _ = writeln!(
                    io::stderr().lock(),
                    "error listener panicked: {panicked}"
                );
            }
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, HostEventKind, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Install the process panic hook. Idempotent.
///
/// The hook chains to whatever hook was installed before it.
pub fn install_panic_hook() {
    static HOOK: OnceLock<()> = OnceLock::new();
    // The hook cannot be swapped while this thread is unwinding.
    if std::thread::panicking() {
        return;
    }
    HOOK.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let thrown = Thrown::from_panic(info.payload(), info.location());
            if is_capturing() {
                stash_panic(thrown);
                return;
            }

            let delivered = match GLOBAL.get() {
                Some(events) if events.listener_count(HostEventKind::UncaughtError) > 0 => {
                    dispatch_outside_hook(events, thrown)
                }
                _ => false,
            };
            if !delivered {
                previous(info);
            }
        }));
    });
}

/// Run `f`, catching a panic instead of letting it unwind further.
///
/// Panics caught here skip the uncaught listeners and the default panic
/// message; the returned [`Thrown`] carries the panic's message and
/// location.
pub fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, Thrown> {
    install_panic_hook();
    let was_capturing = CAPTURING.with(|flag| flag.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.with(|flag| flag.set(was_capturing));

    result.map_err(|payload| {
        take_stashed_panic().unwrap_or_else(|| Thrown::from_panic(payload.as_ref(), None))
    })
}

fn dispatch_outside_hook(events: &HostEvents, thrown: Thrown) -> bool {
    std::thread::scope(|scope| {
        let spawned = std::thread::Builder::new()
            .name("faultline-report".to_string())
            .spawn_scoped(scope, move || {
                catch_panic(|| events.emit_uncaught(thrown)).unwrap_or(true)
            });
        match spawned {
            Ok(handle) => handle.join().unwrap_or(true),
            Err(_) => false,
        }
    })
}

fn is_capturing() -> bool {
    CAPTURING.try_with(Cell::get).unwrap_or(false)
}

fn stash_panic(thrown: Thrown) {
    let _ = STASHED_PANIC.try_with(|slot| {
        if let Ok(mut slot) = slot.try_borrow_mut() {
            *slot = Some(thrown);
        }
    });
}

fn take_stashed_panic() -> Option<Thrown> {
    STASHED_PANIC
        .try_with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
        .ok()
        .flatten()
}
