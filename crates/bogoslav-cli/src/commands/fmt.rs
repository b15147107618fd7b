//! Fmt command implementation.

use std::path::PathBuf;

use bogoslav_common_fs::{read_text, write_text};
use bogoslav_directive::{format_document, parse};
use clap::{Parser, ValueHint};
use tracing::info;

use crate::cli::CommandContext;
use crate::error::CliError;

/// Rewrite conversation blocks in canonical form
#[derive(Debug, Parser)]
pub struct FmtCommand {
    /// File to format
    #[arg(value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Report whether the file would change without writing it
    #[arg(long)]
    pub check: bool,
}

impl FmtCommand {
    pub fn execute(&self, _ctx: &CommandContext) -> Result<(), CliError> {
        let text = read_text(&self.file)?;
        let formatted = format_document(&text, &parse(&text));

        if formatted == text {
            println!("{} is formatted", self.file.display());
            return Ok(());
        }
        if self.check {
            return Err(CliError::validation(format!(
                "{} is not formatted",
                self.file.display()
            )));
        }

        write_text(&self.file, &formatted)?;
        info!(path = %self.file.display(), "formatted");
        println!("formatted {}", self.file.display());
        Ok(())
    }
}
