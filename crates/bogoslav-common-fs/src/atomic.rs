//! Atomic file replacement.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const EXDEV: i32 = 18;

/// Atomically write content to a file.
///
/// The content goes to a temporary sibling first and is renamed over the
/// target, so readers never observe a partially written file. Existing
/// permissions are preserved. Falls back to copy and remove when the rename
/// crosses filesystems.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let temp_path = temp_path_for(path);
    let original_permissions = fs::metadata(path).ok().map(|m| m.permissions());

    debug!(path = %path.display(), bytes = content.len(), "atomic write");

    let written = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        if let Some(permissions) = original_permissions {
            fs::set_permissions(&temp_path, permissions)?;
        }
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(EXDEV) => {
            debug!(path = %path.display(), "cross-filesystem rename, copying");
            let copied = fs::copy(&temp_path, path).map(|_| ());
            let _ = fs::remove_file(&temp_path);
            copied
        }
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            Err(e)
        }
    }
}

/// Hidden sibling of `path`: `.{name}.tmp.{pid}`.
fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    path.with_file_name(format!(".{}.tmp.{}", file_name, std::process::id()))
}
