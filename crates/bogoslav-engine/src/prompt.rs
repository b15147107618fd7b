//! Building model requests from directives.

use bogoslav_common_config::{DispatchConfig, ModelConfig};
use bogoslav_common_fs::read_text;
use bogoslav_directive::{Directive, DirectiveForm, DirectiveKind, ParsedDocument, Role};
use bogoslav_llm::{LlmMessage, LlmRequest, MessageRole};
use bogoslav_session::SessionTurn;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Everything known about the directive being dispatched.
pub struct PromptInput<'a> {
    /// The watched file. Context references resolve relative to its directory.
    pub path: &'a Path,
    pub text: &'a str,
    pub doc: &'a ParsedDocument,
    pub index: usize,
    /// Session history, oldest first. Only inline instructions use it.
    pub history: &'a [SessionTurn],
}

/// Turns directives into [`LlmRequest`]s.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    model: ModelConfig,
    dispatch: DispatchConfig,
}

impl PromptBuilder {
    pub fn new(model: ModelConfig, dispatch: DispatchConfig) -> Self {
        Self { model, dispatch }
    }

    pub fn build(&self, input: &PromptInput<'_>) -> LlmRequest {
        let directive = &input.doc.directives[input.index];
        let mut budget = self.dispatch.max_context_bytes;
        let context = self.context_sections(input, &mut budget);

        let messages = match directive.form {
            DirectiveForm::Inline => {
                let mut messages: Vec<LlmMessage> =
                    input.history.iter().map(turn_message).collect();
                let mut sections = context;
                if self.dispatch.include_preceding_text {
                    let preceding = &input.text[..directive.span.bytes.start];
                    let preceding = tail_within(preceding.trim_end(), budget);
                    if !preceding.trim().is_empty() {
                        sections.push(format!("Document text before the instruction:\n{preceding}"));
                    }
                }
                sections.push(format!("Instruction: {}", directive.prompt_text()));
                messages.push(LlmMessage::user(sections.join("\n\n")));
                messages
            }
            DirectiveForm::Block => {
                let mut messages: Vec<LlmMessage> = directive
                    .messages
                    .iter()
                    .filter(|m| !m.is_blank())
                    .map(|m| LlmMessage {
                        role: match m.role {
                            Role::User => MessageRole::User,
                            Role::Model => MessageRole::Assistant,
                        },
                        content: m.content().to_string(),
                    })
                    .collect();
                if !context.is_empty() {
                    if let Some(first) = messages.iter_mut().find(|m| m.role == MessageRole::User) {
                        first.content = format!("{}\n\n{}", context.join("\n\n"), first.content);
                    }
                }
                messages
            }
        };

        LlmRequest {
            model: directive
                .param("model")
                .unwrap_or_else(|| self.model.model_name())
                .to_string(),
            messages,
            temperature: parsed_param(directive, "temperature").or(self.model.temperature),
            max_tokens: Some(parsed_param(directive, "max_tokens").unwrap_or(self.model.max_tokens)),
            system_prompt: Some(
                directive
                    .param("system")
                    .unwrap_or(&self.model.system_prompt)
                    .to_string(),
            ),
        }
    }

    /// Text of every context reference in the document, in order, within
    /// `budget` bytes.
    fn context_sections(&self, input: &PromptInput<'_>, budget: &mut usize) -> Vec<String> {
        let base = input.path.parent().unwrap_or_else(|| Path::new("."));
        let mut sections = Vec::new();

        for reference in input
            .doc
            .directives
            .iter()
            .filter(|d| d.kind == DirectiveKind::ContextReference)
        {
            let target = reference.body.trim();
            if target.is_empty() {
                continue;
            }
            let path = resolve(base, target);
            let content = match read_text(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(
                        path = %input.path.display(),
                        line = reference.span.display_line(),
                        error = %e,
                        "context reference skipped"
                    );
                    continue;
                }
            };
            let content = head_within(&content, *budget);
            if content.is_empty() {
                warn!(path = %path.display(), "context budget exhausted");
                break;
            }
            *budget -= content.len();
            sections.push(format!("Contents of {target}:\n{}", content.trim_end()));
        }
        sections
    }
}

fn resolve(base: &Path, target: &str) -> PathBuf {
    let target = Path::new(target);
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        base.join(target)
    }
}

fn turn_message(turn: &SessionTurn) -> LlmMessage {
    match turn.role {
        Role::User => LlmMessage::user(turn.content.clone()),
        Role::Model => LlmMessage::assistant(turn.content.clone()),
    }
}

fn parsed_param<T: std::str::FromStr>(directive: &Directive, key: &str) -> Option<T> {
    let raw = directive.param(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(param = key, value = raw, "ignoring invalid directive parameter");
            None
        }
    }
}

/// Longest prefix of `text` no longer than `max` bytes, on a char boundary.
fn head_within(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Longest suffix of `text` no longer than `max` bytes, on a char boundary.
fn tail_within(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bogoslav_common_core::Timestamp;
    use bogoslav_directive::parse;
    use std::fs;

    fn builder(dispatch: DispatchConfig) -> PromptBuilder {
        PromptBuilder::new(ModelConfig::default(), dispatch)
    }

    fn build(builder: &PromptBuilder, path: &Path, text: &str, index: usize) -> LlmRequest {
        let doc = parse(text);
        builder.build(&PromptInput {
            path,
            text,
            doc: &doc,
            index,
            history: &[],
        })
    }

    #[test]
    fn test_inline_prompt_has_preceding_text_and_instruction() {
        let text = "# Notes\nRust has ownership.\n[[ask: summarize above]]\n";
        let request = build(&builder(DispatchConfig::default()), Path::new("notes.md"), text, 0);

        assert_eq!(request.model, "gemini-2.0-flash");
        assert_eq!(request.messages.len(), 1);
        let prompt = &request.messages[0].content;
        assert!(prompt.contains("Rust has ownership."));
        assert!(prompt.ends_with("Instruction: summarize above"));
        assert_eq!(request.max_tokens, Some(4096));
    }

    #[test]
    fn test_preceding_text_can_be_disabled_and_is_bounded() {
        let text = "0123456789abcdef\n[[ask: go]]\n";
        let off = DispatchConfig {
            include_preceding_text: false,
            ..DispatchConfig::default()
        };
        let request = build(&builder(off), Path::new("n.md"), text, 0);
        assert_eq!(request.messages[0].content, "Instruction: go");

        let small = DispatchConfig {
            max_context_bytes: 4,
            ..DispatchConfig::default()
        };
        let request = build(&builder(small), Path::new("n.md"), text, 0);
        assert!(request.messages[0].content.contains("\ncdef\n"));
        assert!(!request.messages[0].content.contains("0123"));
    }

    #[test]
    fn test_history_precedes_inline_prompt() {
        let text = "[[ask: and then?]]\n";
        let doc = parse(text);
        let history = vec![
            SessionTurn {
                ordinal: 1,
                role: Role::User,
                content: "first question".into(),
                directive: None,
                timestamp: Timestamp::now(),
            },
            SessionTurn {
                ordinal: 2,
                role: Role::Model,
                content: "first answer".into(),
                directive: None,
                timestamp: Timestamp::now(),
            },
        ];
        let request = builder(DispatchConfig::default()).build(&PromptInput {
            path: Path::new("n.md"),
            text,
            doc: &doc,
            index: 0,
            history: &history,
        });
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1], LlmMessage::assistant("first answer"));
    }

    #[test]
    fn test_block_prompt_uses_transcript_and_params() {
        let text = "#+begin_ai markdown :model \"gemini-2.5-pro\" :temperature 0.3 :system \"Be brief.\"\nWhat is 2+2?\n[AI]: 4\n[ME]: And 3+3?\n#+end_ai\n";
        let request = build(&builder(DispatchConfig::default()), Path::new("n.md"), text, 0);

        assert_eq!(request.model, "gemini-2.5-pro");
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(
            request.messages,
            vec![
                LlmMessage::user("What is 2+2?"),
                LlmMessage::assistant("4"),
                LlmMessage::user("And 3+3?"),
            ]
        );
    }

    #[test]
    fn test_context_references_are_embedded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("glossary.md"), "borrow: a reference\n").unwrap();
        let file = dir.path().join("notes.md");
        let text = "[[context: glossary.md]] [[context: missing.md]]\n[[ask: define borrow]]\n";

        let off = DispatchConfig {
            include_preceding_text: false,
            ..DispatchConfig::default()
        };
        let request = build(&builder(off), &file, text, 2);
        let prompt = &request.messages[0].content;
        assert!(prompt.starts_with("Contents of glossary.md:\nborrow: a reference"));
        assert!(!prompt.contains("missing.md"));
        assert!(prompt.ends_with("Instruction: define borrow"));
    }

    #[test]
    fn test_invalid_numeric_param_falls_back() {
        let text = "[[ask :max_tokens lots : hi]]\n";
        let request = build(&builder(DispatchConfig::default()), Path::new("n.md"), text, 0);
        assert_eq!(request.max_tokens, Some(4096));
    }

    #[test]
    fn test_char_boundaries() {
        assert_eq!(tail_within("héllo", 4), "llo");
        assert_eq!(head_within("héllo", 2), "h");
    }
}
