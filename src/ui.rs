//! Terminal presentation for the `zkpa` binary: pipeline stage spinners and
//! a notifier that prints toasts.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::notify::{Notification, Notifier, Severity};
use crate::session::PipelineState;

/// Log filter used by the binaries when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_LOG_FILTER))
        .init();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    fn use_pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
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

    pub fn notifier(&self) -> TerminalNotifier {
        TerminalNotifier {
            pretty: self.use_pretty(),
        }
    }
}

/// Label shown while the pipeline sits in `state`.
pub fn stage_label(state: PipelineState) -> &'static str {
    match state {
        PipelineState::Idle => "idle",
        PipelineState::Acquiring => "importing image",
        PipelineState::Previewing => "previewing",
        PipelineState::Hashing => "hashing image",
        PipelineState::AwaitingWitness => "awaiting witness",
        PipelineState::Success => "verified",
        PipelineState::Error => "verification failed",
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }

    /// Finish the stage with a failure mark instead of a check.
    pub fn fail(mut self) {
        self.failed = true;
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let mark = if self.failed { "✘" } else { "✔" };
        let message = format!("{} {} ({})", mark, self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Prints notifications to stderr and mirrors them to the log.
#[derive(Clone, Copy, Debug)]
pub struct TerminalNotifier {
    pretty: bool,
}

impl Notifier for TerminalNotifier {
    fn notify(&mut self, notification: Notification) {
        let tag = match (notification.severity, self.pretty) {
            (Severity::Info, true) => "ℹ",
            (Severity::Success, true) => "✔",
            (Severity::Error, true) => "✘",
            (Severity::Info, false) => "[info]",
            (Severity::Success, false) => "[ok]",
            (Severity::Error, false) => "[error]",
        };
        match notification.severity {
            Severity::Error => log::error!("{}", notification),
            _ => log::info!("{}", notification),
        }
        eprintln!("{} {}", tag, notification);
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
