//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    /// Create a new spinner (shows immediately in interactive mode)
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else if self.interactive {
            println!("{} {}", style("✓").green(), message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else if self.interactive {
            println!("{} {}", style("✗").red(), message);
        } else {
            println!("{} {}", style("[FAIL]").red(), message);
        }
    }
}

/// Progress bar over the stages of a pipeline run.
///
/// Shows an indicatif bar in interactive mode, plain text in CI.
pub struct StageProgress {
    bar: Option<ProgressBar>,
}

impl StageProgress {
    pub fn new(ctx: &UiContext, total: u64) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("  {spinner:.cyan} Building  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}")
                    .unwrap()
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                    .progress_chars("━╸─"),
            );
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(bar)
        } else {
            None
        };
        Self { bar }
    }

    /// Record a completed stage
    pub fn stage_done(&self, stage: &str, fully_cached: bool) {
        let detail = if fully_cached { " (cached)" } else { "" };
        if let Some(ref bar) = self.bar {
            bar.inc(1);
            bar.set_message(format!("{}{}", stage, detail));
        } else {
            println!("  {} {}{}", style("[OK]").green(), stage, detail);
        }
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_non_interactive() {
        let ctx = UiContext::non_interactive();
        let mut spinner = TaskSpinner::new(&ctx);
        spinner.start("Testing...");
        spinner.stop("Done");
        // Should not panic
    }

    #[test]
    fn stage_progress_non_interactive() {
        let ctx = UiContext::non_interactive();
        let progress = StageProgress::new(&ctx, 2);
        progress.stage_done("builder", false);
        progress.stage_done("test", true);
        progress.finish();
        // Should not panic
    }
}
