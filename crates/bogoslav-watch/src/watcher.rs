//! `notify`-backed file watcher.

use crate::guard::SelfWriteGuard;
use crate::pipeline::{ChangeEvent, ChangePipeline};
use crate::WatchError;
use bogoslav_common_config::WatchConfig;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

const RAW_CHANNEL_CAPACITY: usize = 256;

/// Watches the configured paths and yields [`ChangeEvent`]s.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    receiver: mpsc::Receiver<notify::Result<Event>>,
    pipeline: ChangePipeline,
    ready: VecDeque<ChangeEvent>,
}

impl FileWatcher {
    /// Subscribe to the paths in `config`.
    pub fn new(config: &WatchConfig, guard: SelfWriteGuard) -> Result<Self, WatchError> {
        let pipeline = ChangePipeline::from_config(config, guard)?;
        let (tx, rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;

        for (dir, recursive) in pipeline.targets().subscriptions() {
            let mode = if recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher.watch(&dir, mode)?;
            info!(path = %dir.display(), recursive, "watching");
        }

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
            pipeline,
            ready: VecDeque::new(),
        })
    }

    /// Read all watched files once, returning an event per readable file.
    pub fn initial_events(&mut self) -> Vec<ChangeEvent> {
        self.pipeline.scan()
    }

    /// Wait for the next change event. Returns `None` when the notification
    /// source has shut down.
    ///
    /// Cancel-safe: dropping the future loses no notifications.
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }

            let deadline = self.pipeline.next_deadline();
            tokio::select! {
                raw = self.receiver.recv() => match raw {
                    Some(Ok(event)) => self.handle(event),
                    Some(Err(e)) => warn!(error = %e, "file watcher error"),
                    None => return None,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let events = self.pipeline.flush(Instant::now());
                    self.ready.extend(events);
                }
            }
        }
    }

    fn handle(&mut self, event: Event) {
        if !is_content_change(&event.kind) {
            return;
        }
        let now = Instant::now();
        for path in &event.paths {
            self.pipeline.observe(path, now);
        }
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn test_content_change_kinds() {
        assert!(is_content_change(&EventKind::Create(CreateKind::File)));
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Any)));
        assert!(!is_content_change(&EventKind::Access(AccessKind::Any)));
        assert!(!is_content_change(&EventKind::Remove(RemoveKind::File)));
    }
}
