//! Directive parser.
//!
//! The parser walks the document line by line. Conversation blocks and answer
//! blocks consume whole lines; every other line is scanned for inline
//! `[[...]]` directives. Problems are reported as diagnostics and parsing
//! always continues with the rest of the document.

use crate::transcript::{split_messages, unescape_line};
use crate::types::{
    Diagnostic, Directive, DirectiveForm, DirectiveKind, ParsedDocument, Span,
};
use regex::Regex;
use std::collections::BTreeMap;

const INLINE_OPEN: &str = "[[";
const INLINE_CLOSE: &str = "]]";

/// Directive parser.
pub struct DirectiveParser {
    patterns: ParserPatterns,
}

struct ParserPatterns {
    begin_ai: Regex,
    end_ai: Regex,
    begin_answer: Regex,
    end_answer: Regex,
    kind: Regex,
    language: Regex,
}

/// One source line with its byte position.
struct Line<'a> {
    /// Text without the line terminator.
    text: &'a str,
    start: usize,
    index: usize,
}

impl Line<'_> {
    fn text_end(&self) -> usize {
        self.start + self.text.len()
    }

    fn span(&self) -> Span {
        Span::new(self.start..self.text_end(), self.index..self.index + 1)
    }

    fn span_of(&self, range: std::ops::Range<usize>) -> Span {
        Span::new(
            self.start + range.start..self.start + range.end,
            self.index..self.index + 1,
        )
    }
}

fn split_lines(text: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (index, raw) in text.split_inclusive('\n').enumerate() {
        let body = raw.strip_suffix('\n').unwrap_or(raw);
        let body = body.strip_suffix('\r').unwrap_or(body);
        lines.push(Line {
            text: body,
            start,
            index,
        });
        start += raw.len();
    }
    lines
}

/// Which kind of line-delimited block is being read.
#[derive(Clone, Copy)]
enum BlockKind {
    Conversation,
    Answer,
}

impl BlockKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Conversation => "#+begin_ai",
            Self::Answer => "#+begin_answer",
        }
    }
}

impl DirectiveParser {
    pub fn new() -> Self {
        Self {
            patterns: ParserPatterns {
                begin_ai: Regex::new(r"(?i)^[ \t]*#\+begin_ai(?:[ \t]+(.*?))?[ \t]*$")
                    .expect("begin_ai pattern is valid"),
                end_ai: Regex::new(r"(?i)^[ \t]*#\+end_ai[ \t]*$")
                    .expect("end_ai pattern is valid"),
                begin_answer: Regex::new(r"(?i)^[ \t]*#\+begin_answer[ \t]*$")
                    .expect("begin_answer pattern is valid"),
                end_answer: Regex::new(r"(?i)^[ \t]*#\+end_answer[ \t]*$")
                    .expect("end_answer pattern is valid"),
                kind: Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*").expect("kind pattern is valid"),
                language: Regex::new(r"^[A-Za-z][A-Za-z0-9_+-]*$")
                    .expect("language pattern is valid"),
            },
        }
    }

    /// Parse a document into directives and diagnostics.
    pub fn parse(&self, text: &str) -> ParsedDocument {
        let lines = split_lines(text);
        let mut doc = ParsedDocument::default();
        let mut i = 0;

        while i < lines.len() {
            let line = &lines[i];

            if let Some(caps) = self.patterns.begin_ai.captures(line.text) {
                let header = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                i = self.parse_block(text, &lines, i, BlockKind::Conversation, header, &mut doc);
                continue;
            }

            if self.patterns.begin_answer.is_match(line.text) {
                i = self.parse_block(text, &lines, i, BlockKind::Answer, "", &mut doc);
                continue;
            }

            if self.patterns.end_ai.is_match(line.text)
                || self.patterns.end_answer.is_match(line.text)
            {
                doc.diagnostics.push(Diagnostic::warning(
                    "closing marker without matching opener",
                    line.span(),
                ));
                i += 1;
                continue;
            }

            self.scan_inline(text, line, &mut doc);
            i += 1;
        }

        doc
    }

    /// Parse a block opened at `open`. Returns the index of the next line to
    /// examine.
    fn parse_block(
        &self,
        text: &str,
        lines: &[Line<'_>],
        open: usize,
        kind: BlockKind,
        header: &str,
        doc: &mut ParsedDocument,
    ) -> usize {
        let end_pattern = match kind {
            BlockKind::Conversation => &self.patterns.end_ai,
            BlockKind::Answer => &self.patterns.end_answer,
        };

        let mut nested = Vec::new();
        let mut close = None;
        for line in &lines[open + 1..] {
            if end_pattern.is_match(line.text) {
                close = Some(line.index);
                break;
            }
            if self.patterns.begin_ai.is_match(line.text)
                || self.patterns.begin_answer.is_match(line.text)
            {
                nested.push(Diagnostic::error(
                    "nested block opener (escape it as ',#+' to keep it as text)",
                    line.span(),
                ));
            }
        }

        let Some(close) = close else {
            doc.diagnostics.push(Diagnostic::error(
                format!("unterminated {} block", kind.name()),
                lines[open].span(),
            ));
            return open + 1;
        };

        doc.diagnostics.extend(nested);

        let opener = &lines[open];
        let closer = &lines[close];
        let span = Span::new(opener.start..closer.text_end(), open..close + 1);
        let content: String = lines[open + 1..close]
            .iter()
            .map(|l| {
                let mut line = l.text.to_string();
                line.push('\n');
                line
            })
            .collect();

        let directive = match kind {
            BlockKind::Conversation => {
                let (language, params) = self.parse_block_header(header, opener, doc);
                Directive {
                    kind: DirectiveKind::Instruction,
                    form: DirectiveForm::Block,
                    raw: text[span.bytes.clone()].to_string(),
                    span,
                    body: String::new(),
                    params,
                    language,
                    messages: split_messages(&content),
                }
            }
            BlockKind::Answer => Directive {
                kind: DirectiveKind::ResponsePlaceholder,
                form: DirectiveForm::Block,
                raw: text[span.bytes.clone()].to_string(),
                span,
                body: content
                    .split_inclusive('\n')
                    .map(|l| unescape_line(l).into_owned())
                    .collect(),
                params: BTreeMap::new(),
                language: None,
                messages: Vec::new(),
            },
        };

        doc.directives.push(directive);
        close + 1
    }

    fn parse_block_header(
        &self,
        header: &str,
        opener: &Line<'_>,
        doc: &mut ParsedDocument,
    ) -> (Option<String>, BTreeMap<String, String>) {
        let header = header.trim();
        let (language, rest) = match header.split_once(char::is_whitespace) {
            Some((first, rest)) if !first.starts_with(':') => (Some(first), rest),
            None if !header.is_empty() && !header.starts_with(':') => (Some(header), ""),
            _ => (None, header),
        };

        let language = match language {
            Some(lang) if self.patterns.language.is_match(lang) => Some(lang.to_string()),
            Some(lang) => {
                doc.diagnostics.push(Diagnostic::warning(
                    format!("invalid block language '{}'", lang),
                    opener.span(),
                ));
                None
            }
            None => {
                doc.diagnostics.push(Diagnostic::warning(
                    "missing block language",
                    opener.span(),
                ));
                None
            }
        };

        let padded = format!(" {}", rest);
        match scan_params(&padded) {
            Ok((params, leftover)) => {
                if !leftover.trim().is_empty() {
                    doc.diagnostics.push(Diagnostic::error(
                        format!("malformed parameter near '{}'", leftover.trim()),
                        opener.span(),
                    ));
                }
                (language, params)
            }
            Err(message) => {
                doc.diagnostics
                    .push(Diagnostic::error(message, opener.span()));
                (language, BTreeMap::new())
            }
        }
    }

    /// Scan one ordinary line for inline directives.
    fn scan_inline(&self, text: &str, line: &Line<'_>, doc: &mut ParsedDocument) {
        let mut pos = 0;

        while let Some(found) = line.text[pos..].find(INLINE_OPEN) {
            let open = pos + found;
            let inner_start = open + INLINE_OPEN.len();
            let rest = &line.text[inner_start..];
            let close = rest.find(INLINE_CLOSE);
            let nested = rest.find(INLINE_OPEN);

            match (close, nested) {
                (None, _) => {
                    doc.diagnostics.push(Diagnostic::error(
                        "unterminated directive: missing ']]' on the same line",
                        line.span_of(open..line.text.len()),
                    ));
                    pos = inner_start;
                }
                (Some(c), Some(n)) if n < c => {
                    doc.diagnostics.push(Diagnostic::error(
                        "nested directive opener",
                        line.span_of(open..inner_start + n),
                    ));
                    pos = inner_start + n;
                }
                (Some(c), _) => {
                    let end = inner_start + c + INLINE_CLOSE.len();
                    let span = line.span_of(open..end);
                    let inner = &rest[..c];
                    match self.parse_inline(inner) {
                        Ok(mut directive) => {
                            if let DirectiveKind::Unknown(name) = &directive.kind {
                                doc.diagnostics.push(Diagnostic::warning(
                                    format!("unknown directive kind '{}'", name),
                                    span.clone(),
                                ));
                            }
                            directive.raw = text[span.bytes.clone()].to_string();
                            directive.span = span;
                            doc.directives.push(directive);
                        }
                        Err(message) => doc.diagnostics.push(Diagnostic::error(message, span)),
                    }
                    pos = end;
                }
            }
        }
    }

    /// Parse the text between `[[` and `]]`. Span and raw are filled by the
    /// caller.
    fn parse_inline(&self, inner: &str) -> Result<Directive, String> {
        let keyword = self
            .patterns
            .kind
            .find(inner)
            .ok_or_else(|| "malformed directive: expected a kind right after '[['".to_string())?;

        let (params, rest) = scan_params(&inner[keyword.end()..])?;
        let rest = rest.trim_start();
        let body = if rest.is_empty() {
            String::new()
        } else if let Some(body) = rest.strip_prefix(':') {
            body.trim().to_string()
        } else {
            return Err(format!(
                "malformed directive: expected ':' before '{}'",
                rest.trim_end()
            ));
        };

        Ok(Directive {
            kind: DirectiveKind::from_keyword(keyword.as_str()),
            form: DirectiveForm::Inline,
            span: Span::new(0..0, 0..0),
            raw: String::new(),
            body,
            params,
            language: None,
            messages: Vec::new(),
        })
    }
}

impl Default for DirectiveParser {
    fn default() -> Self {
        Self::new()
    }
}

fn is_key_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Read `(WS+ ":" KEY WS+ VALUE)*` from the front of `input`.
///
/// Stops at the first token that does not start a parameter and returns the
/// unread remainder. A ':' directly after the previous token, or one not
/// followed by a key, is left for the caller as the body separator.
fn scan_params(mut input: &str) -> Result<(BTreeMap<String, String>, &str), String> {
    let mut params = BTreeMap::new();

    loop {
        let trimmed = input.trim_start();
        let had_space = trimmed.len() < input.len();
        let Some(after_colon) = trimmed.strip_prefix(':') else {
            return Ok((params, input));
        };
        if !had_space || !after_colon.starts_with(is_key_start) {
            return Ok((params, input));
        }

        let key_len = after_colon
            .find(|c: char| !is_key_char(c))
            .unwrap_or(after_colon.len());
        let key = &after_colon[..key_len];
        let after_key = &after_colon[key_len..];
        let value_start = after_key.trim_start();
        if value_start.len() == after_key.len() || value_start.is_empty() {
            return Err(format!("malformed parameter: ':{}' has no value", key));
        }

        let (value, rest) = scan_value(value_start)
            .ok_or_else(|| format!("malformed parameter: bad value for ':{}'", key))?;
        params.insert(key.to_string(), value);
        input = rest;
    }
}

/// Read a quoted or bare value. Returns the value and the unread remainder.
fn scan_value(input: &str) -> Option<(String, &str)> {
    if let Some(quoted) = input.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = quoted.char_indices();
        while let Some((idx, c)) = chars.next() {
            match c {
                '\\' => value.push(chars.next()?.1),
                '"' => return Some((value, &quoted[idx + 1..])),
                _ => value.push(c),
            }
        }
        return None;
    }

    let len = input
        .find(|c: char| c.is_whitespace() || matches!(c, ']' | '"' | ':'))
        .unwrap_or(input.len());
    (len > 0).then(|| (input[..len].to_string(), &input[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, Severity};
    use test_case::test_case;

    fn parse(text: &str) -> ParsedDocument {
        DirectiveParser::new().parse(text)
    }

    #[test]
    fn test_inline_instruction() {
        let text = "intro\nsee [[ask: summarize above]] please\n";
        let doc = parse(text);
        assert!(doc.diagnostics.is_empty());
        assert_eq!(doc.directives.len(), 1);

        let d = &doc.directives[0];
        assert_eq!(d.kind, DirectiveKind::Instruction);
        assert_eq!(d.form, DirectiveForm::Inline);
        assert_eq!(d.body, "summarize above");
        assert_eq!(d.raw, "[[ask: summarize above]]");
        assert_eq!(d.span.lines, 1..2);
        assert_eq!(&text[d.span.bytes.clone()], "[[ask: summarize above]]");
        assert!(d.is_dispatchable());
    }

    #[test_case("ask", DirectiveKind::Instruction ; "ask")]
    #[test_case("instruct", DirectiveKind::Instruction ; "instruct")]
    #[test_case("do", DirectiveKind::Instruction ; "do_keyword")]
    #[test_case("context", DirectiveKind::ContextReference ; "context")]
    #[test_case("ref", DirectiveKind::ContextReference ; "ref_keyword")]
    #[test_case("include", DirectiveKind::ContextReference ; "include")]
    #[test_case("response", DirectiveKind::ResponsePlaceholder ; "response")]
    #[test_case("answer", DirectiveKind::ResponsePlaceholder ; "answer")]
    fn test_kind_keywords(keyword: &str, expected: DirectiveKind) {
        let doc = parse(&format!("[[{}: x]]", keyword));
        assert_eq!(doc.directives[0].kind, expected);
        assert!(doc.diagnostics.is_empty());
    }

    #[test]
    fn test_unknown_kind_is_recorded_with_warning() {
        let doc = parse("[[summon: a demon]]\n");
        assert_eq!(doc.directives.len(), 1);
        assert_eq!(
            doc.directives[0].kind,
            DirectiveKind::Unknown("summon".to_string())
        );
        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(doc.diagnostics[0].severity, Severity::Warning);
        assert!(!doc.directives[0].is_dispatchable());
    }

    #[test]
    fn test_inline_params() {
        let doc = parse(r#"[[ask :model gemini-1.5-pro :system "Be \"brief\"": explain]]"#);
        assert!(doc.diagnostics.is_empty(), "{:?}", doc.diagnostics);
        let d = &doc.directives[0];
        assert_eq!(d.param("model"), Some("gemini-1.5-pro"));
        assert_eq!(d.param("system"), Some(r#"Be "brief""#));
        assert_eq!(d.body, "explain");
    }

    #[test]
    fn test_separator_with_space_before_colon() {
        let doc = parse("[[ask : do it]]");
        assert_eq!(doc.directives[0].body, "do it");
        assert!(doc.directives[0].params.is_empty());
    }

    #[test]
    fn test_placeholder_without_body() {
        let doc = parse("[[response]]");
        let d = &doc.directives[0];
        assert!(d.is_answer_slot());
        assert!(!d.is_filled_answer());
        assert_eq!(d.body, "");
    }

    #[test]
    fn test_unterminated_inline_yields_one_diagnostic() {
        let text = "[[ask: first]]\n[[ask: \n[[ask: third]]\n";
        let doc = parse(text);

        assert_eq!(doc.diagnostics.len(), 1);
        let diag = &doc.diagnostics[0];
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.span.lines, 1..2);
        assert_eq!(&text[diag.span.bytes.clone()], "[[ask: ");

        let bodies: Vec<_> = doc.directives.iter().map(|d| d.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "third"]);
    }

    #[test]
    fn test_nested_opener() {
        let doc = parse("[[ask: outer [[ask: inner]]");
        assert_eq!(doc.diagnostics.len(), 1);
        assert!(doc.diagnostics[0].message.contains("nested"));
        assert_eq!(doc.directives.len(), 1);
        assert_eq!(doc.directives[0].body, "inner");
    }

    #[test]
    fn test_malformed_parameter() {
        let doc = parse("[[ask :model]] and [[ask: fine]]");
        assert_eq!(doc.diagnostics.len(), 1);
        assert!(doc.diagnostics[0].message.contains("malformed parameter"));
        assert_eq!(doc.directives.len(), 1);
        assert_eq!(doc.directives[0].body, "fine");
    }

    #[test]
    fn test_text_without_separator_is_malformed() {
        let doc = parse("[[Some Page]]");
        assert!(doc.directives.is_empty());
        assert_eq!(doc.diagnostics.len(), 1);
    }

    #[test]
    fn test_block_with_params_and_transcript() {
        let text = "notes\n\n  #+begin_ai markdown :model \"gemini-2.0-flash\" :temperature 0.2\nWhat is Rust?\n[AI]: A language.\n[ME]: Why?\n#+end_ai\ntail\n";
        let doc = parse(text);
        assert!(doc.diagnostics.is_empty(), "{:?}", doc.diagnostics);
        assert_eq!(doc.directives.len(), 1);

        let d = &doc.directives[0];
        assert_eq!(d.form, DirectiveForm::Block);
        assert_eq!(d.kind, DirectiveKind::Instruction);
        assert_eq!(d.language.as_deref(), Some("markdown"));
        assert_eq!(d.param("model"), Some("gemini-2.0-flash"));
        assert_eq!(d.param("temperature"), Some("0.2"));
        assert_eq!(d.span.lines, 2..7);
        assert!(d.raw.trim_start().starts_with("#+begin_ai"));
        assert!(d.raw.ends_with("#+end_ai"));

        let roles: Vec<_> = d.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::User]);
        assert!(d.is_dispatchable());
        assert_eq!(d.prompt_text(), "Why?");
    }

    #[test]
    fn test_block_ending_with_model_message_is_answered() {
        let text = "#+begin_ai md\nq\n[AI]: a\n#+end_ai\n";
        let doc = parse(text);
        assert!(!doc.directives[0].is_dispatchable());
        assert!(doc.is_answered(0, text));
    }

    #[test]
    fn test_missing_language_is_a_warning() {
        let doc = parse("#+begin_ai\nhello\n#+end_ai\n");
        assert_eq!(doc.directives.len(), 1);
        assert_eq!(doc.directives[0].language, None);
        assert_eq!(doc.diagnostics.len(), 1);
        assert!(doc.diagnostics[0].message.contains("language"));
        assert_eq!(doc.diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn test_unterminated_block_resumes_after_opener() {
        let text = "#+begin_ai md\n[[ask: still parsed]]\n";
        let doc = parse(text);
        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(doc.diagnostics[0].span.lines, 0..1);
        assert_eq!(doc.directives.len(), 1);
        assert_eq!(doc.directives[0].body, "still parsed");
    }

    #[test]
    fn test_no_inline_directives_inside_blocks() {
        let text = "#+begin_ai md\nexplain [[ask: this]]\n#+end_ai\n";
        let doc = parse(text);
        assert_eq!(doc.directives.len(), 1);
        assert_eq!(doc.directives[0].form, DirectiveForm::Block);
    }

    #[test]
    fn test_escaped_end_marker_stays_in_block() {
        let text = "#+begin_ai md\nshow:\n,#+end_ai\n#+end_ai\n";
        let doc = parse(text);
        assert!(doc.diagnostics.is_empty());
        assert_eq!(doc.directives[0].messages[0].text, "show:\n#+end_ai\n");
    }

    #[test]
    fn test_answer_block_fills_slot() {
        let text = "[[ask: capital of France?]]\n#+begin_answer\nParis.\n#+end_answer\n";
        let doc = parse(text);
        assert!(doc.diagnostics.is_empty());
        assert_eq!(doc.directives.len(), 2);
        assert!(doc.directives[1].is_filled_answer());
        assert_eq!(doc.directives[1].body, "Paris.\n");
        assert!(doc.answer_slot_of(0, text).is_some());
        assert!(doc.is_answered(0, text));
    }

    #[test]
    fn test_answer_separated_by_text_is_not_a_slot() {
        let text = "[[ask: q]]\nsomething else\n#+begin_answer\nA\n#+end_answer\n";
        let doc = parse(text);
        assert!(doc.answer_slot_of(0, text).is_none());
        assert!(!doc.is_answered(0, text));
    }

    #[test]
    fn test_stray_end_marker() {
        let doc = parse("#+end_answer\n");
        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(doc.diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn test_nested_block_opener_is_reported() {
        let doc = parse("#+begin_ai md\n#+begin_ai md\n#+end_ai\n");
        assert_eq!(doc.directives.len(), 1);
        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(doc.diagnostics[0].span.lines, 1..2);
    }

    #[test]
    fn test_crlf_lines() {
        let text = "a\r\n[[ask: q]]\r\n";
        let doc = parse(text);
        assert_eq!(doc.directives[0].span.lines, 1..2);
        assert_eq!(doc.directives[0].raw, "[[ask: q]]");
    }

    #[test]
    fn test_multibyte_text_around_directives() {
        let text = "Привет [[ask: переведи]] ✓\n";
        let doc = parse(text);
        assert_eq!(doc.directives[0].body, "переведи");
        assert_eq!(&text[doc.directives[0].span.bytes.clone()], "[[ask: переведи]]");
    }

    #[test]
    fn test_scan_value_quoted_escapes() {
        let (value, rest) = scan_value(r#""a \"b\" \\ c" tail"#).unwrap();
        assert_eq!(value, r#"a "b" \ c"#);
        assert_eq!(rest, " tail");
        assert!(scan_value("\"unterminated").is_none());
    }
}
