//! Directive grammar for Bogoslav.
//!
//! Watched files carry two kinds of directives:
//!
//! - inline directives on a single line: `[[ask: summarize the section above]]`,
//!   `[[context: notes/glossary.md]]`, `[[response]]`;
//! - conversation blocks spanning lines:
//!
//! ```text
//! #+begin_ai markdown :model "gemini-2.0-flash"
//! What is ownership?
//! [AI]: A set of rules for memory management.
//! [ME]: Give an example.
//! #+end_ai
//! ```
//!
//! Answers to inline instructions are written back as `#+begin_answer` /
//! `#+end_answer` blocks right after the instruction.

pub mod parser;
pub mod render;
pub mod transcript;
pub mod types;

pub use parser::DirectiveParser;
pub use render::{
    format_document, render_answer_block, serialize_block, serialize_directive_block,
    splice_lines,
};
pub use transcript::{join_messages, split_messages};
pub use types::*;

use std::sync::OnceLock;

/// Parse `text` with a shared parser instance.
pub fn parse(text: &str) -> ParsedDocument {
    static PARSER: OnceLock<DirectiveParser> = OnceLock::new();
    PARSER.get_or_init(DirectiveParser::new).parse(text)
}
