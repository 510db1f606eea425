//! 📊 progress.rs: "Are we there yet?" Every sync, every cron tick, forever.
//!
//! 🚀 One bar per job, one tick per record processed, shared by every worker in the pool.
//! `ProgressBar` is an `Arc` on the inside, so cloning a [`RunProgress`] into each worker
//! is cheap and every clone moves the same bar.
//!
//! ⚠️  Watching this progress bar will not make the QR uploads go faster.
//! We've tried. Science says no.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// 🔢 Formats a number with commas for the 3 people in the audience who like readability.
/// "1000000 docs" → "1,000,000 docs". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    // -- 🧵 pre-allocate like we know what we're doing (we do, we read the book)
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ Formats a Duration into MM:SS.mmm or HH:MM:SS.
/// Cron jobs are usually quick, so the short form keeps the milliseconds.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        // -- 🔄 long haul. order pizza. plural.
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, seconds, duration.subsec_millis())
    }
}

/// 📊 A progress bar for one job's worker pool.
#[derive(Clone)]
pub(crate) struct RunProgress {
    bar: ProgressBar,
}

impl std::fmt::Debug for RunProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("RunProgress")
            .field("position", &self.bar.position())
            .field("length", &self.bar.length())
            .finish()
    }
}

impl RunProgress {
    /// 🚀 A bar with `total` steps, labelled with the job name. Draws to stderr, which
    /// indicatif quietly hides when stderr is not a terminal (cron, CI, pipes).
    pub(crate) fn new(job: &str, total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        // -- 🎨 cyan because it's classy, blue because it's calm
        if let Ok(style) = ProgressStyle::with_template(
            "{msg:>16} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, {elapsed})",
        ) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_message(job.to_string());
        Self { bar }
    }

    /// 🙈 Same API, draws nothing. For tests, where a progress bar is just noise.
    pub(crate) fn hidden(total: usize) -> Self {
        Self {
            bar: ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::hidden()),
        }
    }

    /// ➕ One more record through the pool.
    pub(crate) fn tick(&self) {
        self.bar.inc(1);
    }

    #[cfg(test)]
    pub(crate) fn position(&self) -> u64 {
        self.bar.position()
    }

    /// ✅ Done. Leave the final state on screen.
    pub(crate) fn finish(&self) {
        self.bar.finish();
    }
}
