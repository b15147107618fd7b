//! Rendering directives back to text.

use crate::transcript::{escape_line, join_messages};
use crate::types::{Directive, DirectiveForm, Message, ParsedDocument};
use std::collections::BTreeMap;
use std::ops::Range;

fn quote_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Canonical conversation block, newline-terminated.
///
/// Parameters are written in key order with quoted values.
pub fn serialize_block(
    language: Option<&str>,
    params: &BTreeMap<String, String>,
    messages: &[Message],
) -> String {
    let mut out = String::from("#+begin_ai");
    if let Some(language) = language {
        out.push(' ');
        out.push_str(language);
    }
    for (key, value) in params {
        out.push_str(&format!(" :{} {}", key, quote_value(value)));
    }
    out.push('\n');
    out.push_str(&join_messages(messages));
    out.push_str("#+end_ai\n");
    out
}

/// Canonical form of a parsed conversation block.
pub fn serialize_directive_block(directive: &Directive) -> String {
    serialize_block(
        directive.language.as_deref(),
        &directive.params,
        &directive.messages,
    )
}

/// Answer block holding `text`, newline-terminated.
pub fn render_answer_block(text: &str) -> String {
    let mut out = String::from("#+begin_answer\n");
    for line in text.trim_end().lines() {
        out.push_str(&escape_line(line));
        out.push('\n');
    }
    out.push_str("#+end_answer\n");
    out
}

/// Replace whole lines `lines` of `text` with `replacement`.
///
/// An empty range inserts before that line. `replacement` should be
/// newline-terminated; the document keeps its own final-newline state
/// when the replaced range does not touch the last line.
pub fn splice_lines(text: &str, lines: Range<usize>, replacement: &str) -> String {
    let segments: Vec<&str> = text.split_inclusive('\n').collect();
    let start = lines.start.min(segments.len());
    let end = lines.end.clamp(start, segments.len());

    let mut out = String::with_capacity(text.len() + replacement.len());
    for segment in &segments[..start] {
        out.push_str(segment);
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(replacement);
    if end < segments.len() && !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    for segment in &segments[end..] {
        out.push_str(segment);
    }
    out
}

/// Rewrite every conversation block of `text` in canonical form.
pub fn format_document(text: &str, doc: &ParsedDocument) -> String {
    let mut out = text.to_string();
    // Back to front so earlier line numbers stay valid.
    for directive in doc
        .directives
        .iter()
        .rev()
        .filter(|d| d.form == DirectiveForm::Block && d.is_instruction())
    {
        out = splice_lines(
            &out,
            directive.span.lines.clone(),
            &serialize_directive_block(directive),
        );
    }
    out
}
