//! Progress tracking and reporting

use indicatif::{ProgressBar, ProgressStyle};

/// Counts finished waits across all worker tasks
///
/// Clones share one bar. A disabled tracker draws nothing.
#[derive(Clone)]
pub struct ProgressTracker {
    progress_bar: ProgressBar,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(total_waits: u64, enabled: bool) -> Self {
        if !enabled {
            return Self {
                progress_bar: ProgressBar::hidden(),
            };
        }

        let pb = ProgressBar::new(total_waits);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} waits ({eta})")
            .map_or_else(|_| ProgressStyle::default_bar(), |style| style.progress_chars("#>-"));
        pb.set_style(style);

        Self { progress_bar: pb }
    }

    pub fn update(&self) {
        self.progress_bar.inc(1);
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.progress_bar.position()
    }

    pub fn finish(&self) {
        self.progress_bar.finish_with_message("Run completed");
    }
}
