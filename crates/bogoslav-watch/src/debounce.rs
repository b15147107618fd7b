//! Per-path debouncing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// Collapses bursts of notifications into one event per path per window.
///
/// The window opens at the first notification for a path; notifications
/// arriving while it is open are absorbed. The path becomes due when the
/// window closes, and the file is read at that point so the event carries
/// the latest content.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Note a notification for `path` at `now`.
    pub fn record(&mut self, path: &Path, now: Instant) {
        self.pending.entry(path.to_path_buf()).or_insert(now);
    }

    /// Earliest time at which some path becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().map(|first| *first + self.window)
    }

    /// Remove and return the paths whose window has closed, in path order.
    pub fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let window = self.window;
        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, first)| **first + window <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &due {
            self.pending.remove(path);
        }
        due.sort();
        due
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}
