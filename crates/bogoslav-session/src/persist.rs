//! Session transcripts on disk, one JSON file per session.

use crate::types::{Session, SessionKey};
use crate::SessionError;
use bogoslav_common_core::Timestamp;
use bogoslav_common_fs::{content_hash, write_text};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const EXTENSION: &str = "json";

/// File name for a session: readable tail of the key plus a hash prefix.
fn file_name(key: &SessionKey) -> String {
    let readable: String = key
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let tail_start = readable.len().saturating_sub(40);
    let hash = content_hash(key.as_str().as_bytes());
    format!("{}-{}.{}", &readable[tail_start..], &hash[..12], EXTENSION)
}

pub(crate) fn save_session(dir: &Path, session: &Session) -> Result<PathBuf, SessionError> {
    fs::create_dir_all(dir).map_err(|source| SessionError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join(file_name(&session.key));
    let json = serde_json::to_string_pretty(session).map_err(|source| SessionError::Corrupt {
        path: path.clone(),
        source,
    })?;
    write_text(&path, &json)?;
    debug!(session = %session.key, path = %path.display(), "session saved");
    Ok(path)
}

fn transcript_paths(dir: &Path) -> Result<Vec<PathBuf>, SessionError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|source| SessionError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(EXTENSION))
        .collect();
    paths.sort();
    Ok(paths)
}

fn read_session(path: &Path) -> Result<Session, SessionError> {
    let json = fs::read_to_string(path).map_err(|source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&json).map_err(|source| SessionError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Load every readable transcript in `dir`. Corrupt files are skipped.
pub(crate) fn load_sessions(dir: &Path) -> Result<Vec<Session>, SessionError> {
    let mut sessions = Vec::new();
    for path in transcript_paths(dir)? {
        match read_session(&path) {
            Ok(session) => sessions.push(session),
            Err(e) => warn!(error = %e, "skipping session transcript"),
        }
    }
    Ok(sessions)
}

/// Summary of a persisted transcript.
#[derive(Debug, Clone)]
pub struct TranscriptSummary {
    pub key: SessionKey,
    pub path: PathBuf,
    pub turns: usize,
    pub last_activity: Timestamp,
}

/// Describe the transcripts stored in `dir`, most recently active first.
pub fn list_transcripts(dir: &Path) -> Result<Vec<TranscriptSummary>, SessionError> {
    let mut summaries = Vec::new();
    for path in transcript_paths(dir)? {
        let session = read_session(&path)?;
        summaries.push(TranscriptSummary {
            last_activity: session.last_activity(),
            turns: session.turns.len(),
            key: session.key,
            path,
        });
    }
    summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_file_names_are_safe_and_distinct() {
        let a = file_name(&SessionKey::for_file(Path::new("/work/a b/notes.md")));
        let b = file_name(&SessionKey::for_file(Path::new("/work/a_b/notes.md")));
        assert_ne!(a, b);
        assert!(a.ends_with(".json"));
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')));
    }

    #[test]
    fn test_list_transcripts() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(SessionKey::named("listed"));
        session.push(Role::User, "q".into(), None);
        session.push(Role::Model, "a".into(), None);
        let path = save_session(dir.path(), &session).unwrap();

        let listed = list_transcripts(dir.path()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, SessionKey::named("listed"));
        assert_eq!(listed[0].turns, 2);
        assert_eq!(listed[0].path, path);
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_transcripts(&dir.path().join("none")).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_transcripts_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        assert!(load_sessions(dir.path()).unwrap().is_empty());
        assert!(matches!(
            list_transcripts(dir.path()),
            Err(SessionError::Corrupt { .. })
        ));
    }
}
