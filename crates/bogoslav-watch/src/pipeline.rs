//! From raw notifications to change events.

use crate::debounce::Debouncer;
use crate::guard::SelfWriteGuard;
use crate::ignore::IgnoreFilter;
use crate::WatchError;
use bogoslav_common_config::WatchConfig;
use bogoslav_common_core::Timestamp;
use bogoslav_common_fs::{content_hash, read_text};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// A debounced, deduplicated change to a watched file.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub timestamp: Timestamp,
    pub content: String,
    /// Content hash (hex SHA-256).
    pub hash: String,
}

/// Watched files and directories, canonicalized.
#[derive(Debug, Clone, Default)]
pub struct WatchTargets {
    files: HashSet<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl WatchTargets {
    /// Resolve configured paths. Every path must exist.
    pub fn resolve(paths: &[PathBuf]) -> Result<Self, WatchError> {
        if paths.is_empty() {
            return Err(WatchError::NoPaths);
        }

        let mut targets = Self::default();
        for path in paths {
            let canonical = path.canonicalize().map_err(|source| WatchError::InvalidPath {
                path: path.clone(),
                source,
            })?;
            if canonical.is_dir() {
                targets.dirs.push(canonical);
            } else {
                targets.files.insert(canonical);
            }
        }
        Ok(targets)
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(PathBuf::as_path)
    }

    pub fn dirs(&self) -> impl Iterator<Item = &Path> {
        self.dirs.iter().map(PathBuf::as_path)
    }

    /// Whether `path` is one of the watched files or lies under a watched
    /// directory.
    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains(path) || self.dirs.iter().any(|dir| path.starts_with(dir))
    }

    /// Directories to subscribe to, with whether to recurse.
    ///
    /// Watched files are observed through their parent directory so editors
    /// that save by rename are still seen.
    pub fn subscriptions(&self) -> Vec<(PathBuf, bool)> {
        let mut subs: Vec<(PathBuf, bool)> =
            self.dirs.iter().map(|d| (d.clone(), true)).collect();
        let mut parents: Vec<PathBuf> = self
            .files
            .iter()
            .filter_map(|f| f.parent().map(Path::to_path_buf))
            .filter(|parent| !self.dirs.iter().any(|d| parent.starts_with(d)))
            .collect();
        parents.sort();
        parents.dedup();
        subs.extend(parents.into_iter().map(|p| (p, false)));
        subs
    }
}

/// Filtering, debouncing, reading and deduplication, independent of the
/// notification source.
pub struct ChangePipeline {
    targets: WatchTargets,
    ignore: IgnoreFilter,
    debouncer: Debouncer,
    guard: SelfWriteGuard,
    last_hash: HashMap<PathBuf, String>,
}

impl ChangePipeline {
    pub fn new(
        targets: WatchTargets,
        ignore: IgnoreFilter,
        debounce: Duration,
        guard: SelfWriteGuard,
    ) -> Self {
        Self {
            targets,
            ignore,
            debouncer: Debouncer::new(debounce),
            guard,
            last_hash: HashMap::new(),
        }
    }

    /// Build from the `watch` configuration section.
    pub fn from_config(config: &WatchConfig, guard: SelfWriteGuard) -> Result<Self, WatchError> {
        Ok(Self::new(
            WatchTargets::resolve(&config.paths)?,
            IgnoreFilter::new(&config.ignore_patterns)?,
            Duration::from_millis(config.debounce_ms),
            guard,
        ))
    }

    pub fn targets(&self) -> &WatchTargets {
        &self.targets
    }

    /// Note a raw notification. Returns whether the path is relevant.
    pub fn observe(&mut self, path: &Path, now: Instant) -> bool {
        if !self.targets.contains(path) || self.ignore.is_ignored(path) {
            trace!(path = %path.display(), "notification dropped");
            return false;
        }
        self.debouncer.record(path, now);
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.next_deadline()
    }

    /// Emit events for every path whose debounce window has closed.
    pub fn flush(&mut self, now: Instant) -> Vec<ChangeEvent> {
        self.debouncer
            .take_due(now)
            .into_iter()
            .filter_map(|path| self.materialize(path))
            .collect()
    }

    /// Read every watched file now, bypassing the debounce window.
    ///
    /// Used once at startup so existing directives can be picked up.
    pub fn scan(&mut self) -> Vec<ChangeEvent> {
        let mut paths: Vec<PathBuf> = self.targets.files().map(Path::to_path_buf).collect();
        for dir in self.targets.dirs() {
            let pattern = dir.join("**").join("*");
            let Some(pattern) = pattern.to_str() else {
                continue;
            };
            if let Ok(entries) = glob::glob(pattern) {
                paths.extend(entries.filter_map(Result::ok).filter(|p| p.is_file()));
            }
        }
        paths.retain(|p| !self.ignore.is_ignored(p));
        paths.sort();
        paths.dedup();

        paths
            .into_iter()
            .filter_map(|path| self.materialize(path))
            .collect()
    }

    fn materialize(&mut self, path: PathBuf) -> Option<ChangeEvent> {
        let content = match read_text(&path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unreadable file");
                return None;
            }
        };
        let hash = content_hash(content.as_bytes());

        if self.guard.is_own_write(&path, &hash) {
            debug!(path = %path.display(), "suppressed own write");
            self.last_hash.insert(path, hash);
            return None;
        }

        if self.last_hash.get(&path) == Some(&hash) {
            trace!(path = %path.display(), "content unchanged");
            return None;
        }

        self.last_hash.insert(path.clone(), hash.clone());
        Some(ChangeEvent {
            path,
            timestamp: Timestamp::now(),
            content,
            hash,
        })
    }
}
