//! Pipeline events and the observers that render them.
//!
//! Stages report what happens through an [`Observer`] instead of logging
//! directly, so diagnostics never influence control flow and tests can
//! record the exact event sequence.

use std::path::Path;
use std::time::Duration;

use indicatif::ProgressBar;

use crate::progress::fmt_num;

/// Something observable happened in a pipeline stage.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// A fetch attempt begins (1-based)
    AttemptStarted {
        label: &'a str,
        attempt: u32,
        max_attempts: u32,
    },
    /// A fetch attempt failed
    AttemptFailed {
        label: &'a str,
        attempt: u32,
        error: &'a str,
    },
    /// Sleeping before the next attempt
    RetryScheduled {
        label: &'a str,
        next_attempt: u32,
        delay: Duration,
    },
    /// No attempts left (or the error is not retryable)
    TargetFailed {
        label: &'a str,
        attempts: u32,
        error: &'a str,
    },
    /// A target went through the whole pipeline
    TargetCompleted {
        label: &'a str,
        records: u64,
        malformed: u64,
    },
    ChunkOpened {
        index: usize,
        path: &'a Path,
    },
    ChunkClosed {
        index: usize,
        path: &'a Path,
        rows: u64,
    },
}

/// Receives pipeline events. Shared across stage threads.
pub trait Observer: Send + Sync {
    fn event(&self, event: &Event<'_>);
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn event(&self, _event: &Event<'_>) {}
}

/// Renders events through `log` and mirrors the latest one on a status line.
#[derive(Debug)]
pub struct LogObserver {
    pb: ProgressBar,
}

impl LogObserver {
    pub fn new(pb: ProgressBar) -> Self {
        Self { pb }
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new(ProgressBar::hidden())
    }
}

impl Observer for LogObserver {
    fn event(&self, event: &Event<'_>) {
        match *event {
            Event::AttemptStarted {
                label,
                attempt,
                max_attempts,
            } => {
                log::info!("{label}: attempt {attempt}/{max_attempts}");
                self.pb
                    .set_message(format!("{label}: downloading ({attempt}/{max_attempts})"));
            }
            Event::AttemptFailed {
                label,
                attempt,
                error,
            } => log::warn!("{label}: attempt {attempt} failed: {error}"),
            Event::RetryScheduled {
                label,
                next_attempt,
                delay,
            } => {
                log::info!(
                    "{label}: retrying in {}s (attempt {next_attempt})",
                    delay.as_secs()
                );
                self.pb
                    .set_message(format!("{label}: waiting {}s to retry", delay.as_secs()));
            }
            Event::TargetFailed {
                label,
                attempts,
                error,
            } => log::warn!("{label}: giving up after {attempts} attempt(s): {error}"),
            Event::TargetCompleted {
                label,
                records,
                malformed,
            } => {
                if malformed > 0 {
                    log::info!(
                        "{label}: {} records ({malformed} malformed skipped)",
                        fmt_num(records as usize)
                    );
                } else {
                    log::info!("{label}: {} records", fmt_num(records as usize));
                }
                self.pb.set_message(format!("{label}: done"));
            }
            Event::ChunkOpened { index, path } => {
                log::debug!("chunk {index:04}: opened {}", path.display());
            }
            Event::ChunkClosed { index, path, rows } => {
                log::info!(
                    "chunk {index:04}: {} rows -> {}",
                    fmt_num(rows as usize),
                    path.display()
                );
            }
        }
    }
}
