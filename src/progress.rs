//! Progress reporting utilities using indicatif.
//!
//! The refresh job reports progress through [`ProgressCallback`]; the CLI
//! plugs in [`Progress`], which draws a single bar on stderr. Library callers
//! can supply their own callback or none at all.

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Progress callback for long-running engine jobs.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts.
    ///
    /// # Arguments
    ///
    /// * `phase` - Name of the phase (e.g., "refresh")
    /// * `total` - Total number of items to process
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called for each item processed.
    ///
    /// # Arguments
    ///
    /// * `current` - Current item number (1-based)
    /// * `item` - Label of the item being processed, e.g. `equipment/42`
    fn on_progress(&self, current: usize, item: &str);

    /// Called when a phase completes.
    fn on_phase_end(&self, phase: &str);
}

/// Progress reporter drawing one bar per phase.
pub struct Progress {
    bar: Mutex<Option<ProgressBar>>,
    quiet: bool,
    plain: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// # Arguments
    ///
    /// * `quiet` - If true, nothing is drawn.
    /// * `plain` - If true, use an ASCII bar without colors.
    ///
    /// # Examples
    ///
    /// ```
    /// use refguard::progress::Progress;
    ///
    /// let progress = Progress::new(false, true);
    /// ```
    #[must_use]
    pub fn new(quiet: bool, plain: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            quiet,
            plain,
        }
    }

    fn style(&self) -> ProgressStyle {
        if self.plain {
            ProgressStyle::with_template("[{elapsed_precise}] [{bar:40}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-")
        } else {
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█>-")
        }
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }
        let pb = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
        pb.set_style(self.style());
        pb.set_message(phase.to_string());
        if let Ok(mut bar) = self.bar.lock() {
            *bar = Some(pb);
        }
    }

    fn on_progress(&self, current: usize, item: &str) {
        if self.quiet {
            return;
        }
        if let Ok(bar) = self.bar.lock() {
            if let Some(pb) = bar.as_ref() {
                pb.set_position(current as u64);
                pb.set_message(truncate_label(item, 40));
            }
        }
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }
        if let Ok(mut bar) = self.bar.lock() {
            if let Some(pb) = bar.take() {
                pb.finish_with_message(format!("{phase} complete"));
            }
        }
    }
}

/// Truncate a label for display, keeping its tail.
fn truncate_label(label: &str, max_len: usize) -> String {
    let chars: Vec<char> = label.chars().collect();
    if chars.len() <= max_len {
        return label.to_string();
    }
    let tail: String = chars[chars.len() - (max_len - 3)..].iter().collect();
    format!("...{tail}")
}
