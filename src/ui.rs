use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::orchestrator::AcquisitionReport;
use crate::session::{SessionReport, WorkerExit};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

/// Outcome shown on a per-source status line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceStatus {
    Ok,
    Skipped,
    Failed,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// One status line per device or session.
    pub fn source_line(&self, source_id: &str, status: SourceStatus, detail: &str) {
        eprintln!("{}", format_source_line(source_id, status, detail, self.use_pretty()));
    }

    pub fn summary(&self, report: &AcquisitionReport) {
        eprintln!(
            "==> {} session(s), packet delay {}, {} frame(s) displayed",
            report.sessions.len(),
            report.packet_delay,
            report.frames_displayed()
        );
        for session in &report.sessions {
            let status = match &session.exit {
                Some(WorkerExit::Stopped) => SourceStatus::Ok,
                _ => SourceStatus::Failed,
            };
            self.source_line(&session.source_id, status, &session_detail(session));
        }
    }
}

fn format_source_line(source_id: &str, status: SourceStatus, detail: &str, pretty: bool) -> String {
    let marker = match (status, pretty) {
        (SourceStatus::Ok, true) => "✔",
        (SourceStatus::Skipped, true) => "–",
        (SourceStatus::Failed, true) => "✘",
        (SourceStatus::Ok, false) => "ok",
        (SourceStatus::Skipped, false) => "skip",
        (SourceStatus::Failed, false) => "FAIL",
    };
    format!("  {marker} [{source_id}] {detail}")
}

fn session_detail(session: &SessionReport) -> String {
    let exit = session
        .exit
        .as_ref()
        .map_or_else(|| "never started".to_string(), ToString::to_string);
    format!(
        "{} displayed, {} dropped, {}",
        session.frames_displayed, session.frames_dropped, exit
    )
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
