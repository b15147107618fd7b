//! Filesystem helpers shared by the watcher and the reconciler.
//!
//! Watched files are only ever written through [`write_atomic`], and every
//! observed or written content is fingerprinted with [`content_hash`] so the
//! watcher can recognise its own writes.

mod atomic;
mod hash;

pub use atomic::write_atomic;
pub use hash::content_hash;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Filesystem errors.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    NotUtf8 { path: PathBuf },
}

/// Read a watched file as UTF-8 text.
pub fn read_text(path: &Path) -> Result<String, FsError> {
    let bytes = std::fs::read(path).map_err(|source| FsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| FsError::NotUtf8 {
        path: path.to_path_buf(),
    })
}

/// Atomically replace a watched file with `text` and return its content hash.
pub fn write_text(path: &Path, text: &str) -> Result<String, FsError> {
    write_atomic(path, text.as_bytes()).map_err(|source| FsError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content_hash(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_text_rejects_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(read_text(&path), Err(FsError::NotUtf8 { .. })));
    }

    #[test]
    fn test_read_text_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_text(&dir.path().join("missing.md")).unwrap_err();
        assert!(matches!(err, FsError::Read { .. }));
        assert!(err.to_string().contains("missing.md"));
    }

    #[test]
    fn test_write_text_returns_hash_of_written_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        let hash = write_text(&path, "hello\n").unwrap();
        assert_eq!(hash, content_hash(b"hello\n"));
        assert_eq!(read_text(&path).unwrap(), "hello\n");
    }
}
