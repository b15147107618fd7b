//! Sessions command implementation.

use std::path::PathBuf;

use bogoslav_session::list_transcripts;
use clap::{Parser, ValueHint};

use crate::cli::CommandContext;
use crate::error::CliError;

/// List persisted session transcripts
#[derive(Debug, Parser)]
pub struct SessionsCommand {
    /// Transcript directory (defaults to session.persist_dir from config)
    #[arg(value_hint = ValueHint::DirPath)]
    pub dir: Option<PathBuf>,
}

impl SessionsCommand {
    pub fn execute(&self, ctx: &CommandContext) -> Result<(), CliError> {
        let dir = self
            .dir
            .clone()
            .or_else(|| ctx.config.session.persist_dir.clone())
            .ok_or_else(|| {
                CliError::config_with_hint(
                    "no session directory",
                    "pass a directory or set session.persist_dir",
                )
            })?;

        let transcripts = list_transcripts(&dir)?;
        if transcripts.is_empty() {
            println!("no sessions in {}", dir.display());
            return Ok(());
        }
        for transcript in transcripts {
            let plural = if transcript.turns == 1 { "" } else { "s" };
            println!(
                "{}\t{} turn{}\t{}",
                transcript.key,
                transcript.turns,
                plural,
                transcript.last_activity.to_iso8601()
            );
            if ctx.verbose > 0 {
                println!("\t{}", transcript.path.display());
            }
        }
        Ok(())
    }
}
