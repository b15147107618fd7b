//! Directive identity across edits.
//!
//! Two versions of a file are compared line by line; a directive keeps its
//! [`DirectiveId`] when its first line maps onto the first line of a
//! directive in the new parse.

use bogoslav_common_core::DirectiveId;
use bogoslav_directive::ParsedDocument;
use similar::{DiffTag, TextDiff};
use std::collections::{HashMap, HashSet};
use std::ops::Range;

/// Line-level diff between two texts.
#[derive(Debug, Clone)]
pub struct LineDiff {
    ops: Vec<(DiffTag, Range<usize>, Range<usize>)>,
}

impl LineDiff {
    pub fn new(old: &str, new: &str) -> Self {
        let diff = TextDiff::from_lines(old, new);
        let ops = diff.ops().iter().map(|op| op.as_tag_tuple()).collect();
        Self { ops }
    }

    /// Where old line `line` ended up.
    ///
    /// Equal lines map exactly; replaced lines map by position within the
    /// replaced hunk; deleted lines map nowhere.
    pub fn map_line(&self, line: usize) -> Option<usize> {
        let (tag, old, new) = self.ops.iter().find(|(_, old, _)| old.contains(&line))?;
        let offset = line - old.start;
        match tag {
            DiffTag::Equal => Some(new.start + offset),
            DiffTag::Replace if offset < new.len() => Some(new.start + offset),
            _ => None,
        }
    }

    /// Whether old lines `region` survive untouched and contiguous.
    ///
    /// Insertions at the region boundaries do not count as touching it.
    pub fn preserves(&self, region: &Range<usize>) -> bool {
        self.ops.iter().all(|(tag, old, _)| match tag {
            DiffTag::Equal => true,
            DiffTag::Insert => old.start <= region.start || old.start >= region.end,
            DiffTag::Delete | DiffTag::Replace => {
                old.end <= region.start || old.start >= region.end
            }
        })
    }
}

/// How a directive relates to the previous parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    Modified,
    Unchanged,
}

/// Identity assignment for a new parse.
#[derive(Debug, Clone, Default)]
pub struct Tracking {
    /// One id per directive of the new parse.
    pub ids: Vec<DirectiveId>,
    /// One change per directive of the new parse.
    pub changes: Vec<Change>,
    /// Ids of the old parse with no counterpart.
    pub removed: Vec<DirectiveId>,
}

impl Tracking {
    /// Fresh ids for a first parse; every directive is new.
    pub fn initial(doc: &ParsedDocument) -> Self {
        Self {
            ids: doc.directives.iter().map(|_| DirectiveId::new()).collect(),
            changes: vec![Change::New; doc.directives.len()],
            removed: Vec::new(),
        }
    }
}

/// Carry ids from `old_doc` over to `new_doc`, `diff` running from the
/// old text to the new one.
pub fn track(
    diff: &LineDiff,
    old_doc: &ParsedDocument,
    old_ids: &[DirectiveId],
    new_doc: &ParsedDocument,
) -> Tracking {

    // New directives grouped by first line, in source order.
    let mut by_line: HashMap<usize, Vec<usize>> = HashMap::new();
    for (index, directive) in new_doc.directives.iter().enumerate() {
        by_line
            .entry(directive.span.lines.start)
            .or_default()
            .push(index);
    }

    let mut assigned: Vec<Option<(DirectiveId, Change)>> = vec![None; new_doc.directives.len()];
    let mut claimed: HashSet<usize> = HashSet::new();
    let mut matched_old: HashSet<usize> = HashSet::new();

    let mapped: Vec<Option<usize>> = old_doc
        .directives
        .iter()
        .map(|d| diff.map_line(d.span.lines.start))
        .collect();

    // Identical text on the mapped line first, then position on the line.
    for (old_index, old) in old_doc.directives.iter().enumerate() {
        let Some(candidates) = mapped[old_index].and_then(|line| by_line.get(&line)) else {
            continue;
        };
        let hit = candidates.iter().copied().find(|&new_index| {
            !claimed.contains(&new_index) && new_doc.directives[new_index].raw == old.raw
        });
        if let Some(new_index) = hit {
            claimed.insert(new_index);
            matched_old.insert(old_index);
            assigned[new_index] = Some((old_ids[old_index], Change::Unchanged));
        }
    }

    for (old_index, old) in old_doc.directives.iter().enumerate() {
        if matched_old.contains(&old_index) {
            continue;
        }
        let Some(candidates) = mapped[old_index].and_then(|line| by_line.get(&line)) else {
            continue;
        };
        let hit = candidates.iter().copied().find(|&new_index| {
            !claimed.contains(&new_index) && same_kind(old, &new_doc.directives[new_index])
        });
        if let Some(new_index) = hit {
            claimed.insert(new_index);
            matched_old.insert(old_index);
            assigned[new_index] = Some((old_ids[old_index], Change::Modified));
        }
    }

    let (ids, changes) = assigned
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| (DirectiveId::new(), Change::New)))
        .unzip();

    let removed = old_ids
        .iter()
        .enumerate()
        .filter(|(index, _)| !matched_old.contains(index))
        .map(|(_, id)| *id)
        .collect();

    Tracking {
        ids,
        changes,
        removed,
    }
}

fn same_kind(a: &bogoslav_directive::Directive, b: &bogoslav_directive::Directive) -> bool {
    a.kind == b.kind && a.form == b.form
}
