//! Terminal output for the `herd` CLI.
//!
//! Long steps (model load, video scan) show a spinner on a TTY and a plain
//! `==>` line otherwise. Results always go to stdout; progress goes to stderr.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, plain_requested: bool) -> Self {
        let pretty = is_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => !plain_requested,
                UiMode::Plain => false,
            };
        Self { pretty }
    }

    /// Mode from the command line; `HERD_PLAIN` or `NO_COLOR` turn `auto` plain.
    pub fn detect(mode: UiMode) -> Self {
        let plain_requested =
            std::env::var_os("HERD_PLAIN").is_some() || std::env::var_os("NO_COLOR").is_some();
        Self::new(mode, std::io::stderr().is_terminal(), plain_requested)
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty {
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

    /// One-off line that is not a stage, e.g. the hint disclaimer.
    pub fn notice(&self, message: &str) {
        if self.pretty {
            eprintln!("ℹ {}", message);
        } else {
            eprintln!("note: {}", message);
        }
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

    /// Mark the stage as failed; the closing line shows a cross.
    pub fn fail(mut self) {
        self.failed = true;
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let mark = if self.failed { "✘" } else { "✔" };
        let message = format!(
            "{} {} ({})",
            mark,
            self.name,
            format_duration(self.start.elapsed())
        );
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_needs_a_tty() {
        assert!(!Ui::new(UiMode::Pretty, false, false).is_pretty());
        assert!(Ui::new(UiMode::Pretty, true, true).is_pretty());
        assert!(Ui::new(UiMode::Auto, true, false).is_pretty());
        assert!(!Ui::new(UiMode::Auto, true, true).is_pretty());
        assert!(!Ui::new(UiMode::Plain, true, false).is_pretty());
    }

    #[test]
    fn durations_switch_units() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
