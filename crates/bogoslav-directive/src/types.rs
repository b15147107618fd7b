//! Parsed directive types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// Location of a directive or diagnostic in the source text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Byte range.
    pub bytes: Range<usize>,
    /// 0-based line range, end exclusive.
    pub lines: Range<usize>,
}

impl Span {
    pub fn new(bytes: Range<usize>, lines: Range<usize>) -> Self {
        Self { bytes, lines }
    }

    /// Whether two spans share at least one byte.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.bytes.start < other.bytes.end && other.bytes.start < self.bytes.end
    }

    /// First line, 1-based, for messages.
    pub fn display_line(&self) -> usize {
        self.lines.start + 1
    }
}

/// Directive kind. Closed set; unrecognised names are kept as `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum DirectiveKind {
    Instruction,
    ContextReference,
    ResponsePlaceholder,
    Unknown(String),
}

impl DirectiveKind {
    /// Map a directive keyword to its kind.
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.to_ascii_lowercase().as_str() {
            "ask" | "instruct" | "do" => Self::Instruction,
            "context" | "ref" | "include" => Self::ContextReference,
            "response" | "answer" => Self::ResponsePlaceholder,
            _ => Self::Unknown(keyword.to_string()),
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instruction => write!(f, "instruction"),
            Self::ContextReference => write!(f, "context"),
            Self::ResponsePlaceholder => write!(f, "response"),
            Self::Unknown(name) => write!(f, "unknown({})", name),
        }
    }
}

/// Syntactic form of a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveForm {
    /// `[[kind ...]]` on a single line.
    Inline,
    /// `#+begin_...` / `#+end_...` line pair.
    Block,
}

/// Speaker of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// Transcript header for this role.
    pub fn header(&self) -> &'static str {
        match self {
            Self::User => "[ME]:",
            Self::Model => "[AI]:",
        }
    }
}

/// One message of a block transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Message body with its line structure intact.
    pub text: String,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    /// Body without surrounding whitespace, as sent to the model.
    pub fn content(&self) -> &str {
        self.text.trim()
    }

    pub fn is_blank(&self) -> bool {
        self.content().is_empty()
    }
}

/// A directive found in a watched file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub form: DirectiveForm,
    pub span: Span,
    /// Exact source text covered by `span`.
    pub raw: String,
    /// Inline body or answer text. Empty for conversation blocks.
    pub body: String,
    pub params: BTreeMap<String, String>,
    /// Block language (`#+begin_ai LANG`).
    pub language: Option<String>,
    /// Block transcript.
    pub messages: Vec<Message>,
}

impl Directive {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn is_instruction(&self) -> bool {
        self.kind == DirectiveKind::Instruction
    }

    /// Answer slot: an answer block or a `[[response]]` placeholder.
    pub fn is_answer_slot(&self) -> bool {
        self.kind == DirectiveKind::ResponsePlaceholder
    }

    /// An answer block carrying text.
    pub fn is_filled_answer(&self) -> bool {
        self.is_answer_slot()
            && self.form == DirectiveForm::Block
            && !self.body.trim().is_empty()
    }

    /// Whether this directive, taken alone, warrants a model request.
    ///
    /// Inline instructions need a non-blank body; block instructions need a
    /// transcript ending with a non-blank user message.
    pub fn is_dispatchable(&self) -> bool {
        if !self.is_instruction() {
            return false;
        }
        match self.form {
            DirectiveForm::Inline => !self.body.trim().is_empty(),
            DirectiveForm::Block => self
                .messages
                .last()
                .map(|m| m.role == Role::User && !m.is_blank())
                .unwrap_or(false),
        }
    }

    /// Text sent as the instruction.
    pub fn prompt_text(&self) -> &str {
        match self.form {
            DirectiveForm::Inline => self.body.trim(),
            DirectiveForm::Block => self
                .messages
                .last()
                .map(Message::content)
                .unwrap_or_default(),
        }
    }
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Non-fatal problem found while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub span: Span,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            severity: Severity::Error,
        }
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            severity: Severity::Warning,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: {}: {}",
            self.span.display_line(),
            self.severity,
            self.message
        )
    }
}

/// Result of parsing a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDocument {
    /// Directives in source order.
    pub directives: Vec<Directive>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParsedDocument {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// The answer slot belonging to the instruction at `index`, if any.
    ///
    /// A slot belongs to an inline instruction when it is the next directive
    /// and only whitespace separates the two.
    pub fn answer_slot_of(&self, index: usize, text: &str) -> Option<&Directive> {
        let directive = self.directives.get(index)?;
        if directive.form != DirectiveForm::Inline || !directive.is_instruction() {
            return None;
        }
        let next = self.directives.get(index + 1)?;
        if !next.is_answer_slot() {
            return None;
        }
        let between = text.get(directive.span.bytes.end..next.span.bytes.start)?;
        between.trim().is_empty().then_some(next)
    }

    /// Whether the instruction at `index` already has an answer in the file.
    pub fn is_answered(&self, index: usize, text: &str) -> bool {
        match self.directives.get(index) {
            Some(d) if d.form == DirectiveForm::Block => d
                .messages
                .last()
                .map(|m| m.role == Role::Model)
                .unwrap_or(false),
            Some(_) => self
                .answer_slot_of(index, text)
                .map(Directive::is_filled_answer)
                .unwrap_or(false),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_mapping_is_case_insensitive() {
        assert_eq!(DirectiveKind::from_keyword("ASK"), DirectiveKind::Instruction);
        assert_eq!(
            DirectiveKind::from_keyword("Include"),
            DirectiveKind::ContextReference
        );
        assert_eq!(
            DirectiveKind::from_keyword("summon"),
            DirectiveKind::Unknown("summon".to_string())
        );
    }

    #[test]
    fn test_span_overlap() {
        let a = Span::new(0..10, 0..1);
        let b = Span::new(10..20, 1..2);
        let c = Span::new(5..15, 0..2);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn test_diagnostic_display_uses_one_based_lines() {
        let d = Diagnostic::error("unterminated directive", Span::new(4..6, 2..3));
        assert_eq!(d.to_string(), "line 3: error: unterminated directive");
    }

    #[test]
    fn test_kind_serializes_with_tag() {
        let json = serde_json::to_string(&DirectiveKind::Unknown("foo".into())).unwrap();
        assert_eq!(json, r#"{"type":"unknown","name":"foo"}"#);
        let json = serde_json::to_string(&DirectiveKind::Instruction).unwrap();
        assert_eq!(json, r#"{"type":"instruction"}"#);
    }
}
