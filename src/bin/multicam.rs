//! multicam - synchronized acquisition from several cameras
//!
//! This tool:
//! 1. Discovers cameras (synthetic backend, described by the config)
//! 2. Opens one session per camera and applies the shared packet delay
//! 3. Starts every session behind one start barrier
//! 4. Runs until Enter, Ctrl-C, `--seconds` elapses, or every session has ended
//! 5. Stops, joins and closes every session and prints a summary

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Sender};
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use multicam_acquire::ingest::SyntheticDiscovery;
use multicam_acquire::ui::{SourceStatus, Ui, UiMode};
use multicam_acquire::{AcquireConfig, AcquireError, DisplaySink, FrameStatsSink, Orchestrator};

#[derive(Parser, Debug)]
#[command(
    name = "multicam",
    version,
    about = "Synchronized acquisition from several cameras"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, value_name = "PATH", env = "MULTICAM_CONFIG")]
    config: Option<PathBuf>,

    /// Number of synthetic cameras (overrides the config)
    #[arg(long, value_name = "N")]
    cameras: Option<usize>,

    /// Stop automatically after this many seconds
    #[arg(long, value_name = "SECS")]
    seconds: Option<u64>,

    /// UI mode for stderr progress
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(code) => code,
        Err(err) => {
            log::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::new(args.ui, is_tty, !stdout_is_tty);

    let mut cfg = AcquireConfig::load_from(args.config.as_deref()).context("load config")?;
    if let Some(count) = args.cameras {
        cfg.set_camera_count(count);
        cfg.validate()?;
    }

    let sink = Arc::new(FrameStatsSink::new());
    let mut orchestrator = Orchestrator::new(
        cfg.orchestrator_config(),
        SyntheticDiscovery::new(cfg.cameras.clone()),
        Arc::clone(&sink) as Arc<dyn DisplaySink>,
    );

    let opened = {
        let _stage = ui.stage("Discover and open cameras");
        orchestrator.open_sessions()
    };
    let opened = match opened {
        Ok(opened) => opened,
        Err(err @ (AcquireError::NoDevices | AcquireError::NoSessionsOpened)) => {
            ui.source_line("-", SourceStatus::Failed, &err.to_string());
            return Ok(ExitCode::FAILURE);
        }
        Err(err) => return Err(err.into()),
    };
    for camera in &cfg.cameras {
        let session = opened
            .sessions()
            .iter()
            .find(|s| s.connection_id().0 == camera.connection_id);
        match session {
            Some(session) => ui.source_line(
                session.source_id(),
                SourceStatus::Ok,
                &format!(
                    "{} {}x{} {}, packet delay {}",
                    session.kind(),
                    camera.width,
                    camera.height,
                    session
                        .pixel_descriptor()
                        .map_or_else(|| camera.pixel_format.clone(), ToString::to_string),
                    opened.packet_delay()
                ),
            ),
            None => ui.source_line(
                &camera.connection_id,
                SourceStatus::Skipped,
                "not opened (see log)",
            ),
        }
    }

    let running = {
        let _stage = ui.stage("Start synchronized acquisition");
        opened.start()?
    };

    let (stop_tx, stop_rx) = bounded::<()>(1);
    install_stop_sources(&stop_tx, args.seconds)?;
    eprintln!("==> acquiring; press Enter or Ctrl-C to stop");
    let reason = running.wait_for_stop(&stop_rx);
    log::info!("multicam: stopping ({:?})", reason);

    let mut report = {
        let _stage = ui.stage("Stop and close sessions");
        running.shutdown()
    };
    report.stop_reason = Some(reason);
    ui.summary(&report);
    Ok(ExitCode::SUCCESS)
}

/// Ctrl-C, Enter on stdin and the optional timer all feed one stop channel.
fn install_stop_sources(stop_tx: &Sender<()>, seconds: Option<u64>) -> Result<()> {
    let tx = stop_tx.clone();
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("error setting Ctrl-C handler")?;

    let tx = stop_tx.clone();
    std::thread::Builder::new()
        .name("stdin-stop".to_string())
        .spawn(move || {
            let mut line = String::new();
            // EOF (no terminal attached) is not a stop request.
            if matches!(std::io::stdin().lock().read_line(&mut line), Ok(n) if n > 0) {
                let _ = tx.try_send(());
            }
        })
        .context("spawn stdin watcher")?;

    if let Some(seconds) = seconds {
        let tx = stop_tx.clone();
        std::thread::Builder::new()
            .name("stop-timer".to_string())
            .spawn(move || {
                std::thread::sleep(Duration::from_secs(seconds));
                let _ = tx.try_send(());
            })
            .context("spawn stop timer")?;
    }
    Ok(())
}
