#![forbid(unsafe_code)]

//! Line-oriented application log.
//!
//! Every line has the shape `[timestamp] [level] text` and is written to the
//! log file and echoed to stdout. The file is flushed after each line so a
//! killed process leaves a complete log behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use faultline_core::LogLevel;

/// Directory the demo application writes its log into.
pub const LOG_DIR_ENV: &str = "FAULTLINE_LOG_DIR";
/// File name of the main log inside the log directory.
pub const LOG_FILE_NAME: &str = "main.log";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

static GLOBAL: OnceLock<AppLog> = OnceLock::new();

struct AppLogInner {
    file: BufWriter<File>,
    echo: bool,
}

/// Shared handle to an application log file.
#[derive(Clone)]
pub struct AppLog {
    path: PathBuf,
    inner: Arc<Mutex<AppLogInner>>,
}

impl std::fmt::Debug for AppLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppLog").field("path", &self.path).finish()
    }
}

impl AppLog {
    /// Open (append) the log at `path`, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(AppLogInner {
                file: BufWriter::new(file),
                echo: true,
            })),
        })
    }

    /// Open `main.log` in the directory named by `FAULTLINE_LOG_DIR`, or in
    /// a per-user temp directory when unset.
    pub fn from_env() -> io::Result<Self> {
        let dir = std::env::var_os(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("faultline-e2e-app"));
        Self::open(dir.join(LOG_FILE_NAME))
    }

    /// Stop echoing lines to stdout.
    #[must_use]
    pub fn quiet(self) -> Self {
        self.lock().echo = false;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, level: LogLevel, text: &str) -> io::Result<()> {
        let line = format!(
            "[{}] [{}] {text}",
            chrono::Local::now().format(TIMESTAMP_FORMAT),
            level.as_str()
        );
        let mut inner = self.lock();
        writeln!(inner.file, "{line}")?;
        inner.file.flush()?;
        if inner.echo {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{line}")?;
            stdout.flush()?;
        }
        Ok(())
    }

    pub fn info(&self, text: &str) -> io::Result<()> {
        self.write(LogLevel::Info, text)
    }

    pub fn error(&self, text: &str) -> io::Result<()> {
        self.write(LogLevel::Error, text)
    }

    /// Make `log` reachable through [`AppLog::global`]. Only the first call
    /// wins; returns `false` afterwards.
    pub fn install_global(log: AppLog) -> bool {
        GLOBAL.set(log).is_ok()
    }

    #[must_use]
    pub fn global() -> Option<&'static AppLog> {
        GLOBAL.get()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AppLogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
