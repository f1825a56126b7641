//! Progress bar rendering with TTY detection (`SPEC_FULL.md` §B: the CLI
//! crate is the only place that decides how to render a
//! `ProgressObserver` event — `ossb-core` and `ossb-exec` stay silent
//! about terminals).

use std::time::Instant;

use atty::Stream;
use indicatif::{ProgressBar, ProgressStyle};
use ossb_exec::{ProgressEvent, ProgressObserver};

pub fn is_tty() -> bool {
    atty::is(Stream::Stderr)
}

/// Renders each `ProgressEvent` as a bar in TTY mode, or one line per
/// event to stderr otherwise.
pub struct CliProgress {
    bar: Option<ProgressBar>,
    start: Instant,
}

impl CliProgress {
    pub fn new() -> Self {
        let bar = if is_tty() {
            let pb = ProgressBar::new(100);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };
        Self { bar, start: Instant::now() }
    }

    /// A reporter with no terminal output at all, for `--quiet`.
    pub fn silent() -> Self {
        Self { bar: None, start: Instant::now() }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_with_message(format!("build finished in {:?}", self.start.elapsed()));
        }
    }
}

impl Default for CliProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for CliProgress {
    fn on_progress(&self, event: ProgressEvent) {
        let pct = (event.progress * 100.0).round() as u32;
        let cache = if event.cache_hit { " (cache)" } else { "" };
        let line = format!("[{pct:>3}%] {}: {}{cache}", event.stage, event.message);
        match &self.bar {
            Some(bar) => {
                bar.set_position(pct as u64);
                bar.set_message(line);
            }
            None => eprintln!("{line}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_progress_swallows_events_without_panic() {
        let progress = CliProgress::silent();
        progress.on_progress(ProgressEvent {
            stage: "base".to_string(),
            progress: 0.5,
            message: "extracting".to_string(),
            platform: None,
            operation: Some("extract"),
            cache_hit: false,
        });
        progress.finish();
    }
}
