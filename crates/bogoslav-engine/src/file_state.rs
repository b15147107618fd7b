//! Per-file bookkeeping.

use crate::tracking::{track, LineDiff, Tracking};
use bogoslav_common_core::DirectiveId;
use bogoslav_directive::{parse, Diagnostic, Directive, ParsedDocument};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Last known content of a watched file, its parse and its version.
#[derive(Debug, Clone)]
pub struct FileState {
    path: PathBuf,
    version: u64,
    text: String,
    hash: String,
    doc: ParsedDocument,
    ids: Vec<DirectiveId>,
}

/// Result of accepting new content.
#[derive(Debug, Clone)]
pub struct Update {
    pub tracking: Tracking,
    /// Diagnostics not present in the previous parse.
    pub fresh_diagnostics: Vec<Diagnostic>,
}

impl FileState {
    /// First sighting of a file. Version 1.
    pub fn load(path: impl Into<PathBuf>, text: String, hash: String) -> (Self, Update) {
        let doc = parse(&text);
        let tracking = Tracking::initial(&doc);
        let update = Update {
            fresh_diagnostics: doc.diagnostics.clone(),
            tracking: tracking.clone(),
        };
        let state = Self {
            path: path.into(),
            version: 1,
            text,
            hash,
            doc,
            ids: tracking.ids,
        };
        (state, update)
    }

    /// Accept a change event.
    pub fn accept(&mut self, text: String, hash: String) -> Update {
        let doc = parse(&text);
        let diff = LineDiff::new(&self.text, &text);
        let tracking = track(&diff, &self.doc, &self.ids, &doc);
        let fresh_diagnostics = doc
            .diagnostics
            .iter()
            .filter(|d| !self.already_reported(&diff, d))
            .cloned()
            .collect();

        self.version += 1;
        self.ids = tracking.ids.clone();
        self.text = text;
        self.hash = hash;
        self.doc = doc;

        Update {
            tracking,
            fresh_diagnostics,
        }
    }

    /// Whether `diagnostic` of the new parse was raised for the same line
    /// before `diff` was applied.
    fn already_reported(&self, diff: &LineDiff, diagnostic: &Diagnostic) -> bool {
        self.doc.diagnostics.iter().any(|old| {
            old.message == diagnostic.message
                && old.severity == diagnostic.severity
                && diff.map_line(old.span.lines.start) == Some(diagnostic.span.lines.start)
        })
    }

    /// Record content written by the reconciler.
    pub fn record_write(&mut self, text: String, hash: String) {
        self.accept(text, hash);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn doc(&self) -> &ParsedDocument {
        &self.doc
    }

    pub fn ids(&self) -> &[DirectiveId] {
        &self.ids
    }

    /// Index and directive carrying `id`.
    pub fn find(&self, id: &DirectiveId) -> Option<(usize, &Directive)> {
        let index = self.ids.iter().position(|i| i == id)?;
        Some((index, &self.doc.directives[index]))
    }

    /// Lines a reply to directive `index` may touch: the directive and its
    /// answer slot.
    pub fn protected_region(&self, index: usize) -> Range<usize> {
        let directive = &self.doc.directives[index];
        let end = self
            .doc
            .answer_slot_of(index, &self.text)
            .map(|slot| slot.span.lines.end)
            .unwrap_or(directive.span.lines.end);
        directive.span.lines.start..end.max(directive.span.lines.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::Change;

    fn state(text: &str) -> FileState {
        FileState::load("notes.md", text.to_string(), "h0".into()).0
    }

    #[test]
    fn test_versions_increase_on_accept_and_write() {
        let mut file = state("[[ask: one]]\n");
        assert_eq!(file.version(), 1);
        file.accept("[[ask: one]]\nmore\n".into(), "h1".into());
        assert_eq!(file.version(), 2);
        file.record_write("[[ask: one]]\n#+begin_answer\n1\n#+end_answer\nmore\n".into(), "h2".into());
        assert_eq!(file.version(), 3);
        assert_eq!(file.hash(), "h2");
    }

    #[test]
    fn test_ids_survive_own_write() {
        let mut file = state("[[ask: one]]\n");
        let id = file.ids()[0];
        file.record_write("[[ask: one]]\n#+begin_answer\n1\n#+end_answer\n".into(), "h".into());
        assert_eq!(file.find(&id).map(|(index, _)| index), Some(0));
        assert_eq!(file.ids().len(), 2);
    }

    #[test]
    fn test_fresh_diagnostics_only_once() {
        let (mut file, update) =
            FileState::load("notes.md", "[[ask: \n".to_string(), "h0".into());
        assert_eq!(update.fresh_diagnostics.len(), 1);

        let update = file.accept("[[ask: \n[[ask: ok]]\n".into(), "h1".into());
        assert!(update.fresh_diagnostics.is_empty());
        assert_eq!(update.tracking.changes, vec![Change::New]);
    }

    #[test]
    fn test_shifted_diagnostic_is_not_reported_again() {
        let mut file = state("intro\n[[ask: \n");
        let update = file.accept("intro\nmore\nlines\n[[ask: \n".into(), "h1".into());
        assert!(update.fresh_diagnostics.is_empty());

        // Same message on another line is a new problem.
        let update = file.accept("[[ask: \nintro\nmore\nlines\n[[ask: \n".into(), "h2".into());
        assert_eq!(update.fresh_diagnostics.len(), 1);
        assert_eq!(update.fresh_diagnostics[0].span.lines, 0..1);
    }

    #[test]
    fn test_protected_region_includes_answer_slot() {
        let file = state("a\n[[ask: q]]\n\n#+begin_answer\nold\n#+end_answer\nb\n[[ask: r]]\n");
        assert_eq!(file.protected_region(0), 1..6);
        assert_eq!(file.protected_region(2), 7..8);
    }
}
