use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};

/// Sink for the progress of a dispatch, driven only from the dispatching thread
pub trait Progress {
    /// called once before any unit is dispatched
    fn start(&mut self, units: usize, processes: usize);

    /// called once per unit, in submission order
    fn advance(&mut self, last_finished: &str);

    /// every unit finished
    fn finish(&mut self) {}

    /// the dispatch stopped on an error
    fn abandon(&mut self) {}
}

/// no-op progress
impl Progress for () {
    fn start(&mut self, _units: usize, _processes: usize) {}

    fn advance(&mut self, _last_finished: &str) {}
}

/// Banner and progress bar on stderr, hidden when stderr is not a terminal
#[derive(Debug, Default)]
pub struct TerminalProgress {
    bar: Option<ProgressBar>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

// styled for stderr, where banner and bar are drawn
fn banner(units: usize, processes: usize) -> String {
    let message = format!(
        "
    Experiment info
    ---------------
    Num experiments: {units}
    Num worker processes: {processes}
    "
    );

    style(message).for_stderr().blue().bold().to_string()
}

fn last_finished_message(last_finished: &str) -> String {
    style(format!("[Last finished: {last_finished}]"))
        .for_stderr()
        .green()
        .to_string()
}

impl Progress for TerminalProgress {
    fn start(&mut self, units: usize, processes: usize) {
        let _ = writeln!(io::stderr(), "{}", banner(units, processes));

        let bar = ProgressBar::new(units as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{msg} {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}<{eta_precise}]",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );

        self.bar = Some(bar);
    }

    fn advance(&mut self, last_finished: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(last_finished_message(last_finished));
            bar.inc(1);
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }

    fn abandon(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colouring_follows_stderr() {
        console::set_colors_enabled(true);
        console::set_colors_enabled_stderr(false);

        assert_eq!(last_finished_message("regression/3"), "[Last finished: regression/3]");
        assert!(!banner(4, 2).contains('\u{1b}'));
        assert!(banner(4, 2).contains("Num worker processes: 2"));

        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(true);

        assert!(last_finished_message("regression/3").contains('\u{1b}'));
    }
}
