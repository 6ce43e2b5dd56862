use std::io::IsTerminal;
use std::sync::{Arc, Mutex};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Controls how step output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinners with checkmarks on a terminal.
    Normal,
    /// No ANSI, plain line output for pipes and non-TTY stderr.
    Plain,
    /// Nothing at all (`--quiet`).
    Quiet,
}

impl OutputMode {
    pub fn detect(quiet: bool) -> Self {
        if quiet {
            OutputMode::Quiet
        } else if std::io::stderr().is_terminal() {
            OutputMode::Normal
        } else {
            OutputMode::Plain
        }
    }
}

/// Numbered steps of a composite command, each with a spinner that turns
/// into a checkmark or a cross.
pub struct StepProgress {
    multi: MultiProgress,
    total_steps: usize,
    current_step: usize,
    mode: OutputMode,
}

/// Handle passed into the step closure.
pub struct Step {
    done_label: Arc<Mutex<Option<String>>>,
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] {spinner:.cyan} {msg}")
        .unwrap()
}

fn done_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] \u{2713} {msg:.green}")
        .unwrap()
}

fn failed_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] \u{2717} {msg:.red}")
        .unwrap()
}

impl StepProgress {
    pub fn new(total_steps: usize, mode: OutputMode) -> Self {
        let multi = match mode {
            OutputMode::Normal => MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
            OutputMode::Plain | OutputMode::Quiet => {
                MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
            }
        };
        Self {
            multi,
            total_steps,
            current_step: 0,
            mode,
        }
    }

    /// Run an async step. A spinner shows while it runs; an `Err` leaves
    /// a cross next to the label instead of a checkmark.
    pub async fn run<F, Fut, T, E>(&mut self, label: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(Step) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.current_step += 1;
        let prefix = format!("{}/{}", self.current_step, self.total_steps);

        if self.mode == OutputMode::Plain {
            eprintln!("[{prefix}] {label}");
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.set_prefix(prefix.clone());
        bar.set_message(label.to_string());
        bar.enable_steady_tick(std::time::Duration::from_millis(80));

        let done_label = Arc::new(Mutex::new(None));
        let step = Step {
            done_label: done_label.clone(),
        };

        let result = f(step).await;

        let done = done_label
            .lock()
            .ok()
            .and_then(|l| l.clone())
            .unwrap_or_else(|| label.to_string());

        match &result {
            Ok(_) => {
                if self.mode == OutputMode::Plain {
                    eprintln!("[{prefix}] \u{2713} {done}");
                }
                bar.set_style(done_style());
                bar.finish_with_message(done);
            }
            Err(_) => {
                if self.mode == OutputMode::Plain {
                    eprintln!("[{prefix}] \u{2717} {label}");
                }
                bar.set_style(failed_style());
                bar.finish_with_message(label.to_string());
            }
        }

        result
    }

    /// Instant completion for a step that has nothing to do.
    pub fn skip(&mut self, label: &str) {
        self.current_step += 1;
        let prefix = format!("{}/{}", self.current_step, self.total_steps);

        if self.mode == OutputMode::Plain {
            eprintln!("[{prefix}] - {label} (skipped)");
            return;
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(done_style());
        bar.set_prefix(prefix);
        bar.set_message(format!("{label} (skipped)"));
        bar.finish();
    }

    /// Print a final line below the steps.
    pub fn println(&self, text: &str) {
        match self.mode {
            OutputMode::Plain => eprintln!("{text}"),
            OutputMode::Normal => {
                self.multi.println(text).ok();
            }
            OutputMode::Quiet => {}
        }
    }
}

impl Step {
    /// Override the completion label shown with the checkmark.
    pub fn set_done_label(&self, label: impl Into<String>) {
        if let Ok(mut done) = self.done_label.lock() {
            *done = Some(label.into());
        }
    }
}
