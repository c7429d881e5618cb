#![forbid(unsafe_code)]

//! Run a demo application as a subprocess and collect its log.

use std::ffi::OsString;
use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::app_log::LOG_DIR_ENV;
use crate::error::{HarnessError, Result};
use crate::log_reader::LogReader;

const CI_TIMEOUT: Duration = Duration::from_secs(20);
const LOCAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Margin kept between the kill deadline and the caller's own timeout.
const KILL_MARGIN: Duration = Duration::from_millis(100);

/// Options for [`E2eApp::run`].
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Remove the log directory before and after the run.
    pub clear_logs: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { clear_logs: true }
    }
}

/// A demo application under test.
#[derive(Debug, Clone)]
pub struct E2eApp {
    program: PathBuf,
    name: String,
    args: Vec<OsString>,
    timeout: Duration,
    log_dir: PathBuf,
}

impl E2eApp {
    /// Wrap the executable at `program`. The app name is its file stem.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let name = program
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "app".to_string());
        let log_dir = std::env::temp_dir().join("faultline-e2e").join(&name);
        Self {
            program,
            name,
            args: Vec::new(),
            timeout: default_timeout(),
            log_dir,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    /// Extra arguments passed after the harness's own flags.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Run the app and read back its log.
    pub fn run(&self, options: RunOptions) -> Result<LogReader> {
        if options.clear_logs {
            self.remove_log_dir()?;
        }

        self.run_application()?;
        let reader = self.read_log()?;

        if options.clear_logs {
            self.remove_log_dir()?;
        }
        Ok(reader)
    }

    pub fn read_log(&self) -> Result<LogReader> {
        LogReader::from_dir(&self.log_dir)
    }

    pub fn remove_log_dir(&self) -> Result<()> {
        match fs::remove_dir_all(&self.log_dir) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Start the app in test mode and wait for it to exit.
    ///
    /// The child is killed when it outlives the timeout. Its combined output
    /// is emitted as one `debug` event either way.
    pub fn run_application(&self) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.arg("--test");
        if std::env::var_os("DOCKER").is_some() {
            command.arg("--no-sandbox");
        }
        command
            .args(&self.args)
            .env("FORCE_STYLES", "true")
            .env(LOG_DIR_ENV, &self.log_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(target: "faultline.e2e", app = %self.name, program = %self.program.display(), "starting app");
        let mut child = command.spawn()?;
        let output = Arc::new(Mutex::new(Vec::new()));
        let pumps = spawn_output_pumps(&mut child, &output);

        let deadline = self.timeout.saturating_sub(KILL_MARGIN);
        let result = match child.wait_timeout(deadline)? {
            Some(status) if status.success() => Ok(()),
            Some(status) => Err(HarnessError::AppFailed {
                app: self.name.clone(),
                status,
            }),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                Err(HarnessError::Timeout {
                    app: self.program.display().to_string(),
                    seconds: self.timeout.as_secs_f64(),
                })
            }
        };

        for pump in pumps {
            let _ = pump.join();
        }
        let lines = match output.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        tracing::debug!(target: "faultline.e2e", app = %self.name, "{}", strip_noise(&lines));
        result
    }
}

/// Timeout used when none is given: 20 s under CI, 5 s otherwise.
#[must_use]
pub fn default_timeout() -> Duration {
    if std::env::var_os("CI").is_some() {
        CI_TIMEOUT
    } else {
        LOCAL_TIMEOUT
    }
}

/// Drop known environment noise and empty lines from collected output.
#[must_use]
pub fn strip_noise(lines: &[String]) -> String {
    lines
        .iter()
        .filter(|line| !is_noise(line))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_noise(line: &str) -> bool {
    line.trim().is_empty() || line.starts_with("Fontconfig") || line.contains("Desktop Identity")
}

fn spawn_output_pumps(
    child: &mut Child,
    output: &Arc<Mutex<Vec<String>>>,
) -> Vec<thread::JoinHandle<()>> {
    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(spawn_pump(stdout, Arc::clone(output)));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(spawn_pump(stderr, Arc::clone(output)));
    }
    pumps
}

fn spawn_pump<R>(reader: R, output: Arc<Mutex<Vec<String>>>) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else {
                break;
            };
            if let Ok(mut guard) = output.lock() {
                guard.push(line);
            }
        }
    })
}
