//! 📊 progress.rs: "Are we there yet?" Every pipeline, every time, forever.
//!
//! The store does not tell us how many clusters are coming, so there is no bar to fill. Instead
//! a spinner carries a small comfy-table: throughput over a sliding window, what went to the
//! index, and how long we have been at it.
//!
//! ⚠️ Watching the spinner will not make it go faster. We've tried. Science says no.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

use crate::pipeline::RunSummary;

// -- 🎨 redrawing a table per record is a great way to benchmark your terminal
const RENDER_EVERY: Duration = Duration::from_millis(200);
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS or HH:MM:SS. If it shows HH:MM:SS, call your mom. It's been a while.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 Tracks processed units and renders the spinner message.
pub(crate) struct ProgressMetrics {
    label: String,
    progress_bar: ProgressBar,
    /// 🔄 sliding window of (timestamp, processed)
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
    last_render: Option<Instant>,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ProgressMetrics")
            .field("label", &self.label)
            .field("samples", &self.rate_samples.len())
            .finish()
    }
}

impl ProgressMetrics {
    /// 🚀 A spinner labelled `label`; `visible == false` gives a hidden bar that renders nothing.
    pub(crate) fn new(label: impl Into<String>, visible: bool) -> Self {
        let progress_bar = if visible {
            let bar = ProgressBar::new_spinner();
            // -- 🎨 the template is a literal; if indicatif ever rejects it we keep the default style
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
                bar.set_style(style);
            }
            bar
        } else {
            ProgressBar::hidden()
        };
        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0));
        Self {
            label: label.into(),
            progress_bar,
            rate_samples,
            start_time,
            last_render: None,
        }
    }

    /// 🔄 Feed the latest counters. Redraws at most every `RENDER_EVERY`.
    pub(crate) fn update(&mut self, summary: &RunSummary) {
        let now = Instant::now();
        if self.last_render.is_some_and(|at| now.duration_since(at) < RENDER_EVERY) {
            return;
        }
        self.last_render = Some(now);
        let rate = self.rate(now, summary.processed);
        self.render(summary, rate);
        self.progress_bar.tick();
    }

    pub(crate) fn finish(&self) {
        self.progress_bar.finish_and_clear();
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 📈 Units per second over the sliding window.
    fn rate(&mut self, now: Instant, processed: u64) -> f64 {
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > RATE_WINDOW {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, processed));
        match self.rate_samples.front() {
            Some(&(oldest_time, oldest)) => {
                let elapsed = now.duration_since(oldest_time).as_secs_f64();
                if elapsed > 0.0 {
                    processed.saturating_sub(oldest) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn render(&self, summary: &RunSummary, rate: f64) {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        let right = |text: String| Cell::new(text).set_alignment(CellAlignment::Right);

        table.add_row(vec![
            right(format!("{}/s", format_number(rate as u64))),
            right(format!("{} processed", format_number(summary.processed))),
        ]);
        table.add_row(vec![
            right(format!("{} clusters", format_number(summary.clusters))),
            right(format!("{} singles", format_number(summary.singles))),
        ]);
        table.add_row(vec![
            right(format!("{} docs", format_number(summary.documents))),
            right(format!("{} deletions", format_number(summary.deletions))),
        ]);
        table.add_row(vec![right(format!("{} elapsed", format_duration(self.elapsed())))]);

        self.progress_bar.set_message(format!("{}\n{}", self.label, table));
    }
}
