//! Terminal progress for the command-line tools.
//!
//! Pretty mode draws spinners and a frame counter on stderr; plain mode prints
//! one line per stage so logs stay readable when piped.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
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

    pub fn from_flag(flag: Option<&str>, is_tty: bool) -> Self {
        let mode = match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty)
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    /// Announce a stage; its wall time is reported when the guard drops.
    pub fn stage(&self, name: &str) -> StageGuard {
        if !self.pretty() {
            eprintln!("[{name}]");
            return StageGuard::new(name.to_owned(), None);
        }
        let bar = styled_bar(ProgressBar::new_spinner(), "{spinner:.cyan} {msg}");
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_message(name.to_owned());
        StageGuard::new(name.to_owned(), Some(bar))
    }

    /// Frame counter; `total` is `None` for sources of unknown length.
    pub fn frames(&self, total: Option<u64>) -> FrameProgress {
        if !self.pretty() {
            return FrameProgress { bar: None };
        }
        let bar = match total {
            Some(total) => styled_bar(ProgressBar::new(total), "{bar:30} {pos}/{len} frames {msg}"),
            None => styled_bar(ProgressBar::new_spinner(), "{spinner} {pos} frames {msg}"),
        };
        FrameProgress { bar: Some(bar) }
    }
}

pub struct FrameProgress {
    bar: Option<ProgressBar>,
}

impl FrameProgress {
    pub fn tick(&self, tracked: usize) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
            bar.set_message(format!("({tracked} tracked)"));
        }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

/// Reports a stage's wall time when dropped.
pub struct StageGuard {
    name: String,
    started: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            started: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let summary = format!("{} done in {}", self.name, elapsed_label(self.started.elapsed()));
        match self.spinner.take() {
            Some(spinner) => spinner.finish_with_message(summary),
            None => eprintln!("    {summary}"),
        }
    }
}

/// Draw on stderr with `template`, keeping indicatif's default on a bad template.
fn styled_bar(bar: ProgressBar, template: &str) -> ProgressBar {
    bar.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::with_template(template) {
        bar.set_style(style);
    }
    bar
}

/// Compact wall-time label: milliseconds, seconds, then minutes.
fn elapsed_label(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    match elapsed.as_secs() {
        0 => format!("{millis}ms"),
        secs if secs < 60 => format!("{:.1}s", elapsed.as_secs_f64()),
        secs => format!("{}m{:02}s", secs / 60, secs % 60),
    }
}
