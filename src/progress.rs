use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

use crate::orchestrator::{ProgressCallback, ProgressUpdate};

fn analysis_bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:<10} {bar:40.cyan/blue} {percent:>3}% {pos}/{len} frames [{elapsed_precise}<{eta_precise}] speed {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Terminal progress bar fed by the orchestrator's progress callback.
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
    started: Instant,
    resumed_at: u64,
}

impl ProgressReporter {
    pub fn new(total: u64, already_processed: u64) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(analysis_bar_style());
        bar.set_prefix("analysing");
        bar.set_position(already_processed);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self {
            bar,
            started: Instant::now(),
            resumed_at: already_processed,
        }
    }

    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            started: Instant::now(),
            resumed_at: 0,
        }
    }

    pub fn callback(&self) -> ProgressCallback {
        let reporter = self.clone();
        Arc::new(move |update: ProgressUpdate| reporter.update(update))
    }

    fn update(&self, update: ProgressUpdate) {
        if update.processed > self.bar.length().unwrap_or(0) {
            self.bar.set_length(update.processed);
        }
        self.bar.set_position(update.processed);
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            let analysed = update.processed.saturating_sub(self.resumed_at);
            self.bar
                .set_message(format!("{:.1} fps", analysed as f64 / elapsed));
        }
    }

    pub fn finish(&self, processed: u64, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(processed.min(total));
        self.bar
            .finish_with_message(format!("completed {processed}/{total} frames"));
    }

    pub fn abandon(&self, message: impl Into<String>) {
        self.bar.abandon_with_message(message.into());
    }
}
