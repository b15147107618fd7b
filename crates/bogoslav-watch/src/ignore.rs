//! Ignore globs.

use crate::WatchError;
use glob::Pattern;
use std::path::Path;

/// Paths that never produce change events.
#[derive(Debug, Clone, Default)]
pub struct IgnoreFilter {
    patterns: Vec<Pattern>,
}

impl IgnoreFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, WatchError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p.as_ref()).map_err(|e| WatchError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Whether the full path or its file name matches any pattern.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str());
        self.patterns.iter().any(|pattern| {
            pattern.matches_path(path) || name.map(|n| pattern.matches(n)).unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> IgnoreFilter {
        IgnoreFilter::new(&["**/.git/**", "*.swp", "**/*.tmp.*"]).unwrap()
    }

    #[test]
    fn test_ignores_matching_paths() {
        let filter = filter();
        assert!(filter.is_ignored(Path::new("/w/.git/HEAD")));
        assert!(filter.is_ignored(Path::new("/w/notes/.notes.md.swp")));
        assert!(filter.is_ignored(Path::new("/w/.notes.md.tmp.4242")));
    }

    #[test]
    fn test_keeps_regular_files() {
        let filter = filter();
        assert!(!filter.is_ignored(Path::new("/w/notes.md")));
        assert!(!filter.is_ignored(Path::new("/w/gitnotes/todo.org")));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = IgnoreFilter::new(&["[oops"]).unwrap_err();
        assert!(matches!(err, WatchError::InvalidPattern { .. }));
    }
}
