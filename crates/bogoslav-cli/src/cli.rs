//! CLI argument definitions using clap derive macros.

use std::path::{Path, PathBuf};

use bogoslav_common_config::{BogoslavConfig, ConfigLoader};
use bogoslav_common_log::{LogConfig, LogFormat, LogLevel};
use clap::{ArgAction, Parser, Subcommand, ValueHint};

use crate::commands::{FmtCommand, ParseCommand, SessionsCommand, WatchCommand};
use crate::error::CliError;

/// Bogoslav - an assistant living in your text files
///
/// Watches files for `[[ask: ...]]` instructions and `#+begin_ai` blocks,
/// sends them to a language model and writes the answers back.
#[derive(Debug, Parser)]
#[command(
    name = "bogoslav",
    author,
    version,
    about,
    long_about = None,
    propagate_version = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Increase verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "BOGOSLAV_CONFIG",
        value_hint = ValueHint::FilePath
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch files and answer their directives
    Watch(WatchCommand),

    /// Print the directives and diagnostics of a file
    Parse(ParseCommand),

    /// Rewrite conversation blocks in canonical form
    Fmt(FmtCommand),

    /// List persisted session transcripts
    Sessions(SessionsCommand),
}

impl Cli {
    /// Load configuration from `--config` or `.bogoslav/config.yaml`.
    pub fn load_config(&self) -> Result<BogoslavConfig, CliError> {
        let config = match &self.config {
            Some(path) => {
                let project_dir = path.parent().unwrap_or_else(|| Path::new("."));
                ConfigLoader::new(project_dir).load_from(path)?
            }
            None => ConfigLoader::new(".").load()?,
        };
        Ok(config)
    }

    /// Logging setup: config file, then environment, then flags.
    pub fn log_config(&self, config: &BogoslavConfig) -> LogConfig {
        let mut log = LogConfig {
            level: LogLevel::parse(&config.logging.level).unwrap_or_default(),
            format: LogFormat::parse(&config.logging.format),
            file_path: config.logging.file.clone(),
            ..LogConfig::default()
        };
        log.apply_env();
        if self.verbose > 0 || self.quiet {
            log.level = LogLevel::from_verbosity(self.verbose, self.quiet);
        }
        log
    }

    /// Execute the selected command
    pub async fn execute(self, config: BogoslavConfig) -> Result<(), CliError> {
        let ctx = CommandContext {
            config,
            verbose: self.verbose,
        };

        match self.command {
            Command::Watch(cmd) => cmd.execute(ctx).await,
            Command::Parse(cmd) => cmd.execute(&ctx),
            Command::Fmt(cmd) => cmd.execute(&ctx),
            Command::Sessions(cmd) => cmd.execute(&ctx),
        }
    }
}

/// Context passed to all commands
#[derive(Debug)]
pub struct CommandContext {
    pub config: BogoslavConfig,
    pub verbose: u8,
}
