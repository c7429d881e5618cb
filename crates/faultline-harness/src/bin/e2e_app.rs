#![forbid(unsafe_code)]

//! Demo application driven by the end-to-end tests.
//!
//! Writes three lines to its log: one from the host, one relayed from a
//! rendering surface over the bridge, and one through the process-global log.

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use faultline_core::{
    CaptureOptions, Collaborators, ErrorCapture, LogLevel, NormalizedError, RendererBridge,
    Surfaces,
};
use faultline_harness::{AppLog, Result};

const RELAY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(
    name = "faultline-e2e-app",
    about = "Demo host with one rendering surface, used by the faultline E2E tests",
    version
)]
struct Cli {
    /// Non-interactive mode: failure dialogs are disabled.
    #[arg(long)]
    test: bool,

    /// Accepted for sandboxed CI runners; no effect.
    #[arg(long)]
    no_sandbox: bool,

    /// Idle without logging until killed.
    #[arg(long)]
    hang: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    faultline_core::init_tracing();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error}");
            ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(1))
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    tracing::info!(target: "faultline.e2e", test = cli.test, no_sandbox = cli.no_sandbox, "demo app starting");
    if cli.hang {
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }

    let log = AppLog::from_env()?;
    AppLog::install_global(log.clone());

    let sink = log.clone();
    let options = CaptureOptions::new()
        .with_show_dialog(!cli.test)
        .with_log(move |label, error: &NormalizedError| {
            let text = match label {
                Some(label) => format!("{label}: {}", error.stack()),
                None => error.stack().to_string(),
            };
            sink.error(&text)?;
            Ok(())
        })
        .merged_with(CaptureOptions::from_env());

    let surfaces = Arc::new(Surfaces::new());
    let capture = ErrorCapture::with_collaborators(
        options,
        Collaborators::default().with_surfaces(surfaces.clone()),
    );
    capture.start_catching(CaptureOptions::new());

    log.info("log from the main process")?;

    let bridge = RendererBridge::new();
    let surface = surfaces.create(Some(bridge.link()));
    let renderer = surface.run(|surface| surface.log(LogLevel::Info, "log from renderer"))?;

    let mut relayed = Vec::new();
    if !bridge.recv_timeout(&capture, RELAY_TIMEOUT, |entry| relayed.push(entry)) {
        tracing::warn!(target: "faultline.e2e", "renderer sent nothing");
    }
    let _ = renderer.join();
    for entry in relayed {
        log.write(entry.level, &entry.text)?;
    }

    if let Some(global) = AppLog::global() {
        global.info("log through global object")?;
    }

    capture.stop_catching();
    Ok(())
}
