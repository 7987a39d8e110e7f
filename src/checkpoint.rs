//! Checkpoint Management
//!
//! Tracks the polling window of each input so consecutive invocations cover
//! time without gaps or overlap.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, DurationRound, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Half-open window `[start, end)` of metric time to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// ISO 8601 interval as accepted by the metrics `timespan` parameter
    pub fn timespan(&self) -> String {
        format!(
            "{}/{}",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// Persisted marker of the last polled window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub end: DateTime<Utc>,
}

/// File-backed checkpoints, one file per input
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn checkpoint_path(&self, input_name: &str) -> PathBuf {
        let file: String = input_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }

    /// Load the checkpoint of an input, if one was written
    pub fn load(&self, input_name: &str) -> Result<Option<Checkpoint>> {
        let path = self.checkpoint_path(input_name);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read checkpoint {:?}", path))?;
        let checkpoint = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse checkpoint {:?}", path))?;
        Ok(Some(checkpoint))
    }

    /// Save the checkpoint of an input
    pub fn save(&self, input_name: &str, checkpoint: &Checkpoint) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create checkpoint dir {:?}", self.dir))?;

        let path = self.checkpoint_path(input_name);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(checkpoint)?;

        // Write then rename so a crash never leaves a half-written checkpoint
        std::fs::write(&tmp, content).with_context(|| format!("Failed to write {:?}", tmp))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::minutes(1)).unwrap_or(t)
}

/// Compute this invocation's window
///
/// The window starts where the previous one ended, or `interval` before now on
/// the first run, and ends at the current minute.
pub fn put_time_window(
    store: &CheckpointStore,
    input_name: &str,
    interval: std::time::Duration,
    now: DateTime<Utc>,
) -> Result<TimeWindow> {
    let end = truncate_to_minute(now);
    let start = match store.load(input_name)? {
        Some(checkpoint) => checkpoint.end,
        None => {
            let lookback = Duration::from_std(interval).context("Polling interval out of range")?;
            truncate_to_minute(now - lookback)
        }
    };

    let window = TimeWindow { start, end };
    tracing::info!("Time window for {}: {}", input_name, window.timespan());
    Ok(window)
}

/// Persist the end of `window` so the next invocation resumes from it
pub fn put_time_checkpoint(
    store: &CheckpointStore,
    input_name: &str,
    window: &TimeWindow,
) -> Result<()> {
    if window.is_empty() {
        // Never move the checkpoint backwards
        return Ok(());
    }
    store.save(input_name, &Checkpoint { end: window.end })?;
    tracing::debug!("Checkpoint for {} advanced to {}", input_name, window.end);
    Ok(())
}
