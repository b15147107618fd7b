//! Conversation sessions.
//!
//! A session is the append-only history of user and model turns for one
//! watched file, or for a name given with the `:session` directive parameter.

pub mod persist;
pub mod store;
pub mod types;

pub use persist::{list_transcripts, TranscriptSummary};
pub use store::SessionStore;
pub use types::*;

use std::path::PathBuf;
use thiserror::Error;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to access session directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt session transcript {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Write(#[from] bogoslav_common_fs::FsError),
}
