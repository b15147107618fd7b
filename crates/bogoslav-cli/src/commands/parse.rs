//! Parse command implementation.

use std::path::{Path, PathBuf};

use bogoslav_common_fs::read_text;
use bogoslav_directive::{parse, Diagnostic, Directive, DirectiveKind, ParsedDocument, Severity};
use clap::{Parser, ValueEnum, ValueHint};
use serde::Serialize;

use crate::cli::CommandContext;
use crate::error::CliError;

const SUMMARY_WIDTH: usize = 60;

/// Print the directives and diagnostics of a file
#[derive(Debug, Parser)]
pub struct ParseCommand {
    /// File to parse
    #[arg(value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = ParseFormat::Text)]
    pub format: ParseFormat,
}

/// Output format selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ParseFormat {
    #[default]
    Text,
    Json,
}

#[derive(Serialize)]
struct Report<'a> {
    path: &'a Path,
    directives: Vec<DirectiveReport<'a>>,
    diagnostics: &'a [Diagnostic],
}

#[derive(Serialize)]
struct DirectiveReport<'a> {
    #[serde(flatten)]
    directive: &'a Directive,
    dispatchable: bool,
    answered: bool,
}

impl ParseCommand {
    pub fn execute(&self, _ctx: &CommandContext) -> Result<(), CliError> {
        let text = read_text(&self.file)?;
        let doc = parse(&text);

        let output = match self.format {
            ParseFormat::Text => render_text(&self.file, &text, &doc),
            ParseFormat::Json => {
                let report = Report {
                    path: &self.file,
                    directives: doc
                        .directives
                        .iter()
                        .enumerate()
                        .map(|(index, directive)| DirectiveReport {
                            directive,
                            dispatchable: directive.is_dispatchable(),
                            answered: doc.is_answered(index, &text),
                        })
                        .collect(),
                    diagnostics: &doc.diagnostics,
                };
                serde_json::to_string_pretty(&report)? + "\n"
            }
        };
        print!("{output}");

        if doc.has_errors() {
            let errors = doc
                .diagnostics
                .iter()
                .filter(|d| d.severity == Severity::Error)
                .count();
            return Err(CliError::validation(format!(
                "{} error(s) in {}",
                errors,
                self.file.display()
            )));
        }
        Ok(())
    }
}

fn render_text(path: &Path, text: &str, doc: &ParsedDocument) -> String {
    let mut out = String::new();
    for (index, directive) in doc.directives.iter().enumerate() {
        let status = if !directive.is_instruction() {
            ""
        } else if doc.is_answered(index, text) {
            " (answered)"
        } else if directive.is_dispatchable() {
            " (pending)"
        } else {
            ""
        };
        out.push_str(&format!(
            "{}:{}: {} {:?}{} {}\n",
            path.display(),
            directive.span.display_line(),
            directive.kind,
            directive.form,
            status,
            summary(directive)
        ));
    }
    for diagnostic in &doc.diagnostics {
        out.push_str(&format!(
            "{}:{}: {}: {}\n",
            path.display(),
            diagnostic.span.display_line(),
            diagnostic.severity,
            diagnostic.message
        ));
    }
    out
}

fn summary(directive: &Directive) -> String {
    let text = match &directive.kind {
        DirectiveKind::Instruction => directive.prompt_text(),
        _ => directive.body.trim(),
    };
    let first = text.lines().next().unwrap_or_default();
    if first.chars().count() > SUMMARY_WIDTH {
        let cut: String = first.chars().take(SUMMARY_WIDTH).collect();
        format!("{cut}...")
    } else {
        first.to_string()
    }
}
