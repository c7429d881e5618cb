#![forbid(unsafe_code)]

//! Host platform collaborators.
//!
//! The reporting pipeline needs three things from the platform it runs on:
//! a snapshot of component versions for the override hook, a way to show a
//! modal failure dialog, and a way to open a URL in the default external
//! handler. [`Platform`] bundles them so hosts can swap in their own
//! implementation (a GUI toolkit, a test recorder).

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};

use crate::error::CollaboratorError;

/// Read-only snapshot of component → version identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Versions(BTreeMap<String, String>);

impl Versions {
    /// Build a snapshot from component/version pairs.
    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Versions of the running host.
    #[must_use]
    pub fn current() -> Self {
        Self::new([
            ("faultline", env!("CARGO_PKG_VERSION")),
            ("os", std::env::consts::OS),
            ("arch", std::env::consts::ARCH),
            ("family", std::env::consts::FAMILY),
        ])
    }

    #[must_use]
    pub fn get(&self, component: &str) -> Option<&str> {
        self.0.get(component).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Platform services used by the reporting pipeline.
pub trait Platform: Send + Sync {
    /// Runtime/platform identifiers handed verbatim to the override hook.
    fn versions(&self) -> Versions;

    /// Request a modal failure dialog. Fire-and-forget.
    fn show_error_box(&self, title: &str, body: &str) -> Result<(), CollaboratorError>;

    /// Open `url` in the default external handler. Fire-and-forget.
    fn open_url(&self, url: &str) -> Result<(), CollaboratorError>;
}

/// Platform backed by the operating system.
///
/// There is no native dialog renderer here; the error box is written to
/// stderr as a titled block. URLs are opened with the platform's opener
/// command (`open`, `xdg-open`, or `cmd /C start`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPlatform;

impl Platform for SystemPlatform {
    fn versions(&self) -> Versions {
        Versions::current()
    }

    fn show_error_box(&self, title: &str, body: &str) -> Result<(), CollaboratorError> {
        let mut stderr = io::stderr().lock();
        writeln!(stderr, "{title}")?;
        writeln!(stderr, "{body}")?;
        stderr.flush()?;
        Ok(())
    }

    fn open_url(&self, url: &str) -> Result<(), CollaboratorError> {
        let mut command = opener_command(url);
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        tracing::debug!(target: "faultline.platform", url = %url, "opening external url");
        // Reap the opener in the background so it never lingers as a zombie.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}

fn opener_command(url: &str) -> Command {
    if cfg!(target_os = "macos") {
        let mut command = Command::new("open");
        command.arg(url);
        command
    } else if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]).arg(url);
        command
    } else {
        let mut command = Command::new("xdg-open");
        command.arg(url);
        command
    }
}

/// Platform that records requests instead of acting on them.
///
/// Used in test mode and by embedders that run without a display.
#[derive(Debug, Default)]
pub struct HeadlessPlatform {
    versions: Versions,
    dialogs: Mutex<Vec<(String, String)>>,
    urls: Mutex<Vec<String>>,
}

impl HeadlessPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::with_versions(Versions::current())
    }

    #[must_use]
    pub fn with_versions(versions: Versions) -> Self {
        Self {
            versions,
            dialogs: Mutex::new(Vec::new()),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Dialogs requested so far, as `(title, body)` pairs.
    #[must_use]
    pub fn dialogs(&self) -> Vec<(String, String)> {
        self.dialogs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// URLs opened so far.
    #[must_use]
    pub fn opened_urls(&self) -> Vec<String> {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Platform for HeadlessPlatform {
    fn versions(&self) -> Versions {
        self.versions.clone()
    }

    fn show_error_box(&self, title: &str, body: &str) -> Result<(), CollaboratorError> {
        self.dialogs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((title.to_string(), body.to_string()));
        Ok(())
    }

    fn open_url(&self, url: &str) -> Result<(), CollaboratorError> {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_versions_name_the_host() {
        let versions = Versions::current();
        assert_eq!(versions.get("faultline"), Some(env!("CARGO_PKG_VERSION")));
        assert_eq!(versions.get("os"), Some(std::env::consts::OS));
        assert!(versions.get("missing").is_none());
    }

    #[test]
    fn versions_iterate_in_component_order() {
        let versions = Versions::new([("engine", "9"), ("app", "1.2.3")]);
        let pairs: Vec<_> = versions.iter().collect();
        assert_eq!(pairs, vec![("app", "1.2.3"), ("engine", "9")]);
        assert_eq!(versions.len(), 2);
    }

    #[test]
    fn headless_platform_records_requests() {
        let platform = HeadlessPlatform::with_versions(Versions::new([("app", "1")]));
        platform.show_error_box("title", "body").expect("dialog");
        platform.open_url("https://example.com/?a=1").expect("open");

        assert_eq!(
            platform.dialogs(),
            vec![("title".to_string(), "body".to_string())]
        );
        assert_eq!(platform.opened_urls(), vec!["https://example.com/?a=1"]);
        assert_eq!(platform.versions().get("app"), Some("1"));
    }
}
