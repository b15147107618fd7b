//! Merging model replies back into files.

use crate::dispatcher::Submission;
use crate::file_state::FileState;
use crate::tracking::LineDiff;
use bogoslav_directive::{
    render_answer_block, serialize_block, splice_lines, Diagnostic, Directive, DirectiveForm,
    Message, Role, Span,
};

/// What to do with a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Write this text to the file.
    Apply { text: String },
    /// An edit overlapped the protected region; nothing is written.
    ConflictDiscard(Diagnostic),
}

/// Decide how `reply` lands in the current content of the file.
///
/// The region protected at submission (directive plus answer slot) must have
/// survived every edit since; edits elsewhere only shift where the reply goes.
pub fn reconcile(submission: &Submission, file: &FileState, reply: &str) -> Reconciliation {
    let (index, directive) = match locate(submission, file) {
        Ok(found) => found,
        Err(reason) => return conflict(submission, reason),
    };

    let text = file.text();
    let updated = match directive.form {
        DirectiveForm::Inline => insert_answer(file, index, directive, reply),
        DirectiveForm::Block => {
            let mut messages = directive.messages.clone();
            messages.push(Message::new(Role::Model, format!("{}\n", reply.trim())));
            messages.push(Message::new(Role::User, "\n"));
            let block = serialize_block(directive.language.as_deref(), &directive.params, &messages);
            splice_lines(text, directive.span.lines.clone(), &block)
        }
    };
    Reconciliation::Apply { text: updated }
}

/// Find the submitted directive in the current parse.
fn locate<'a>(
    submission: &Submission,
    file: &'a FileState,
) -> Result<(usize, &'a Directive), &'static str> {
    let start = if file.version() == submission.version {
        submission.span.lines.start
    } else {
        let diff = LineDiff::new(&submission.snapshot, file.text());
        if !diff.preserves(&submission.region) {
            return Err("the directive or its answer was edited while the request was pending");
        }
        diff.map_line(submission.span.lines.start)
            .ok_or("the directive was removed while the request was pending")?
    };

    file.doc()
        .directives
        .iter()
        .enumerate()
        .find(|(_, d)| d.span.lines.start == start && d.raw == submission.raw)
        .ok_or("the directive is no longer where it was")
}

fn insert_answer(file: &FileState, index: usize, directive: &Directive, reply: &str) -> String {
    let text = file.text();
    let answer = render_answer_block(reply);

    let Some(slot) = file.doc().answer_slot_of(index, text) else {
        return splice_lines(text, directive.span.lines.end..directive.span.lines.end, &answer);
    };

    if occupies_own_lines(text, &slot.span) {
        return splice_lines(text, slot.span.lines.clone(), &answer);
    }

    // A placeholder sharing its line with other text: drop it and put the
    // answer below that line.
    let mut without = String::with_capacity(text.len());
    without.push_str(&text[..slot.span.bytes.start]);
    without.push_str(&text[slot.span.bytes.end..]);
    let below = slot.span.lines.end;
    splice_lines(&without, below..below, &answer)
}

/// Whether nothing but whitespace shares the lines of `span`.
fn occupies_own_lines(text: &str, span: &Span) -> bool {
    let line_start = text[..span.bytes.start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = text[span.bytes.end..]
        .find('\n')
        .map_or(text.len(), |i| span.bytes.end + i);
    text[line_start..span.bytes.start].trim().is_empty()
        && text[span.bytes.end..line_end].trim().is_empty()
}

fn conflict(submission: &Submission, reason: &str) -> Reconciliation {
    Reconciliation::ConflictDiscard(Diagnostic::warning(
        format!("conflict: reply discarded, {reason}"),
        submission.span.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bogoslav_common_core::DirectiveId;
    use bogoslav_session::SessionKey;
    use std::path::Path;

    fn load(text: &str) -> FileState {
        FileState::load("notes.md", text.to_string(), "h".into()).0
    }

    fn submit(file: &FileState, index: usize) -> Submission {
        let directive = &file.doc().directives[index];
        Submission {
            directive: file.ids()[index],
            path: file.path().to_path_buf(),
            version: file.version(),
            snapshot: file.text().to_string(),
            span: directive.span.clone(),
            raw: directive.raw.clone(),
            region: file.protected_region(index),
            session: SessionKey::for_file(Path::new("notes.md")),
            prompt: directive.prompt_text().to_string(),
        }
    }

    fn applied(outcome: Reconciliation) -> String {
        match outcome {
            Reconciliation::Apply { text } => text,
            other => panic!("expected a write, got {other:?}"),
        }
    }

    #[test]
    fn test_inline_answer_is_inserted_below() {
        let file = load("intro\n[[ask: summarize]]\noutro\n");
        let submission = submit(&file, 0);
        let text = applied(reconcile(&submission, &file, "A summary.\n"));
        assert_eq!(
            text,
            "intro\n[[ask: summarize]]\n#+begin_answer\nA summary.\n#+end_answer\noutro\n"
        );
    }

    #[test]
    fn test_existing_answer_is_replaced() {
        let file = load("[[ask: q]]\n#+begin_answer\nold\n#+end_answer\nrest\n");
        let submission = submit(&file, 0);
        let text = applied(reconcile(&submission, &file, "new"));
        assert_eq!(text, "[[ask: q]]\n#+begin_answer\nnew\n#+end_answer\nrest\n");
    }

    #[test]
    fn test_placeholder_is_replaced() {
        let file = load("[[ask: q]]\n\n  [[response]]\nrest\n");
        let submission = submit(&file, 0);
        let text = applied(reconcile(&submission, &file, "new"));
        assert_eq!(text, "[[ask: q]]\n\n#+begin_answer\nnew\n#+end_answer\nrest\n");

        let file = load("[[ask: q]] [[response]]\nrest\n");
        let submission = submit(&file, 0);
        let text = applied(reconcile(&submission, &file, "new"));
        assert_eq!(text, "[[ask: q]] \n#+begin_answer\nnew\n#+end_answer\nrest\n");
    }

    #[test]
    fn test_block_reply_is_appended_to_transcript() {
        let file = load("#+begin_ai markdown\nWhat is 2+2?\n#+end_ai\nafter\n");
        let submission = submit(&file, 0);
        let text = applied(reconcile(&submission, &file, "4"));
        assert_eq!(
            text,
            "#+begin_ai markdown\nWhat is 2+2?\n[AI]: 4\n[ME]:\n#+end_ai\nafter\n"
        );
    }

    #[test]
    fn test_edit_above_shifts_the_answer() {
        let original = "l1\nl2\nl3\nl4\nl5\nl6\nl7\nl8\nl9\n[[ask: summarize above]]\n";
        let mut file = load(original);
        let submission = submit(&file, 0);

        file.accept(original.replace("l5\n", "line five\nand more\n"), "h2".into());
        let text = applied(reconcile(&submission, &file, "Summary."));
        assert!(text.starts_with("l1\nl2\nl3\nl4\nline five\nand more\n"));
        assert!(text.ends_with("[[ask: summarize above]]\n#+begin_answer\nSummary.\n#+end_answer\n"));
    }

    #[test]
    fn test_edit_inside_region_discards() {
        let mut file = load("[[ask: q]]\n#+begin_answer\nold\n#+end_answer\n");
        let submission = submit(&file, 0);
        file.accept("[[ask: q]]\n#+begin_answer\nmine now\n#+end_answer\n".into(), "h2".into());

        match reconcile(&submission, &file, "new") {
            Reconciliation::ConflictDiscard(diagnostic) => {
                assert!(diagnostic.message.starts_with("conflict"));
                assert_eq!(diagnostic.span, submission.span);
            }
            other => panic!("expected a conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_removed_directive_discards() {
        let mut file = load("a\n[[ask: q]]\nb\n");
        let submission = submit(&file, 0);
        file.accept("a\nb\n".into(), "h2".into());
        assert!(matches!(
            reconcile(&submission, &file, "x"),
            Reconciliation::ConflictDiscard(_)
        ));
    }

    #[test]
    fn test_unrelated_directive_id_does_not_matter() {
        let file = load("[[ask: q]]\n");
        let mut submission = submit(&file, 0);
        submission.directive = DirectiveId::new();
        assert!(matches!(
            reconcile(&submission, &file, "x"),
            Reconciliation::Apply { .. }
        ));
    }
}
