//! Progress reporting for import batches.
//!
//! The batch writer emits `ProgressEvent`s to a `ProgressSink`. Sinks include a
//! crossbeam channel (the background job's status stream) and an indicatif bar
//! with a log-only mode where the bar is hidden for tail-friendly output.

use crossbeam_channel::Sender;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use std::time::Duration;

use crate::batch::BatchStatus;

#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// One more record has been attempted
    Progress {
        processed: usize,
        total: usize,
        percent: u8,
    },
    /// Terminal event, sent once when an import ends
    Finished {
        status: BatchStatus,
        persisted: usize,
    },
}

impl ProgressEvent {
    /// Progress event with an integer percentage that only reaches 100 when
    /// every record has been attempted. An empty batch is complete.
    pub fn progress(processed: usize, total: usize) -> Self {
        let percent = if total == 0 {
            100
        } else {
            (processed.min(total) * 100 / total) as u8
        };
        ProgressEvent::Progress {
            processed,
            total,
            percent,
        }
    }

    /// One JSON object per event, e.g. `{"progress":40}` or
    /// `{"status":"completed","tracks_created":12}`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&StatusMessage::from(self)).unwrap_or_default()
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum StatusMessage<'a> {
    Progress {
        progress: u8,
    },
    Finished {
        status: &'static str,
        tracks_created: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        degraded: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<&'a str>,
    },
}

impl<'a> From<&'a ProgressEvent> for StatusMessage<'a> {
    fn from(event: &'a ProgressEvent) -> Self {
        match event {
            ProgressEvent::Progress { percent, .. } => StatusMessage::Progress { progress: *percent },
            ProgressEvent::Finished { status, persisted } => StatusMessage::Finished {
                status: status.as_str(),
                tracks_created: *persisted,
                degraded: match status {
                    BatchStatus::CompletedWithDegraded { degraded } => Some(*degraded),
                    _ => None,
                },
                reason: match status {
                    BatchStatus::Failed { reason } => Some(reason.as_str()),
                    _ => None,
                },
            },
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

impl ProgressSink for Sender<ProgressEvent> {
    fn report(&self, event: &ProgressEvent) {
        // A dropped receiver just means nobody is watching
        let _ = self.send(event.clone());
    }
}

/// Discards every event.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Terminal progress bar, or periodic log lines in log-only mode.
pub struct BarProgress {
    bar: ProgressBar,
    log_only: bool,
    log_interval: usize,
}

impl BarProgress {
    pub fn new(total: usize, msg: &str, log_only: bool) -> Self {
        Self {
            bar: create_progress_bar(total as u64, msg, log_only),
            log_only,
            log_interval: (total / 20).max(1),
        }
    }
}

impl ProgressSink for BarProgress {
    fn report(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Progress {
                processed, total, ..
            } => {
                self.bar.set_position(*processed as u64);
                if self.log_only {
                    log_progress("Enriching", *processed, *total, self.log_interval);
                }
            }
            ProgressEvent::Finished { status, persisted } => {
                self.bar
                    .finish_with_message(format!("{}: {} tracks stored", status.as_str(), persisted));
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Format duration in human-readable format
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = secs / 60.0;
        format!("{:.1}m", mins)
    }
}

/// Create a progress bar with consistent styling.
/// In log-only mode, the progress bar is hidden.
pub fn create_progress_bar(len: u64, msg: &str, log_only: bool) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if log_only {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(msg.to_string());
    pb
}

/// Create a spinner for indeterminate progress.
/// In log-only mode, the spinner is hidden.
pub fn create_spinner(msg: &str, log_only: bool) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if log_only {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        if let Ok(style) = ProgressStyle::default_spinner().template("{msg} {spinner} [{elapsed_precise}]") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(msg.to_string());
    pb
}

/// Log progress at fixed intervals and on the last record.
fn log_progress(phase: &str, current: usize, total: usize, interval: usize) {
    if current % interval == 0 || current == total {
        let pct = if total == 0 {
            100.0
        } else {
            100.0 * current as f64 / total as f64
        };
        tracing::info!("[{}] {}/{} ({:.1}%)", phase, current, total, pct);
    }
}
