//! File watching for Bogoslav.
//!
//! Raw notifications from `notify` are filtered against the watched targets
//! and ignore globs, debounced per path, read, hashed and finally checked
//! against the [`SelfWriteGuard`] so the assistant never reacts to its own
//! writes.

pub mod debounce;
pub mod guard;
pub mod ignore;
pub mod pipeline;
pub mod watcher;

pub use debounce::Debouncer;
pub use guard::SelfWriteGuard;
pub use ignore::IgnoreFilter;
pub use pipeline::{ChangeEvent, ChangePipeline, WatchTargets};
pub use watcher::FileWatcher;

use std::path::PathBuf;
use thiserror::Error;

/// Watch errors. All of them are configuration problems found at startup.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("no paths to watch")]
    NoPaths,

    #[error("cannot watch {path}: {source}")]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
}
