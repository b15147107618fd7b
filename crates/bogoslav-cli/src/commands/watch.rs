//! Watch command implementation.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use bogoslav_common_config::{BogoslavConfig, ConfigLoader, ProviderKind};
use bogoslav_engine::{Engine, EngineEvent};
use bogoslav_llm::ProviderFactory;
use bogoslav_session::SessionStore;
use clap::{Parser, ValueHint};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cli::CommandContext;
use crate::error::CliError;

/// Watch files and answer their directives
#[derive(Debug, Parser)]
pub struct WatchCommand {
    /// Files or directories to watch (defaults to watch.paths from config)
    #[arg(value_hint = ValueHint::AnyPath)]
    pub paths: Vec<PathBuf>,

    /// Debounce window in milliseconds
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Glob of paths to ignore (repeatable)
    #[arg(long = "ignore", value_name = "GLOB")]
    pub ignore: Vec<String>,

    /// Model provider (gemini, anthropic)
    #[arg(long, value_parser = parse_provider)]
    pub provider: Option<ProviderKind>,

    /// Model name
    #[arg(long)]
    pub model: Option<String>,

    /// Do not answer directives already present when a file is first read
    #[arg(long)]
    pub no_dispatch_existing: bool,

    /// Print replies to stdout as they stream in
    #[arg(long)]
    pub echo: bool,
}

fn parse_provider(s: &str) -> Result<ProviderKind, String> {
    ProviderKind::parse(s).ok_or_else(|| format!("unknown provider '{s}' (expected gemini or anthropic)"))
}

impl WatchCommand {
    /// Apply command line overrides to the loaded configuration.
    fn apply(&self, config: &mut BogoslavConfig) {
        if !self.paths.is_empty() {
            config.watch.paths = self.paths.clone();
        }
        if let Some(debounce_ms) = self.debounce_ms {
            config.watch.debounce_ms = debounce_ms;
        }
        config.watch.ignore_patterns.extend(self.ignore.iter().cloned());
        if let Some(provider) = self.provider {
            if provider != config.model.provider {
                // Model names and key variables are provider specific.
                config.model.model.clear();
                config.model.api_key_env.clear();
            }
            config.model.provider = provider;
        }
        if let Some(model) = &self.model {
            config.model.model = model.clone();
        }
        if self.no_dispatch_existing {
            config.dispatch.dispatch_existing = false;
        }
    }

    pub async fn execute(&self, ctx: CommandContext) -> Result<(), CliError> {
        let mut config = ctx.config;
        self.apply(&mut config);
        ConfigLoader::new(".").validate(&config)?;
        if config.watch.paths.is_empty() {
            return Err(CliError::config_with_hint(
                "no paths to watch",
                "pass paths to `bogoslav watch` or set watch.paths",
            ));
        }

        let provider = ProviderFactory::create(&config.model)?;
        info!(provider = provider.name(), model = provider.model(), "model provider ready");

        let sessions = Arc::new(match &config.session.persist_dir {
            Some(dir) => SessionStore::with_persistence(dir),
            None => SessionStore::new(),
        });
        let engine = Engine::new(&config, provider, sessions);
        let watcher = engine.watcher(&config.watch)?;

        if self.echo {
            tokio::spawn(echo_replies(engine.subscribe()));
        }

        engine.run(watcher, shutdown_signal()).await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Print streamed replies, one block per request.
async fn echo_replies(mut events: broadcast::Receiver<EngineEvent>) {
    let mut stdout = std::io::stdout();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "echo fell behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            EngineEvent::Submitted { path, line, .. } => {
                let _ = writeln!(stdout, "--- {}:{}", path.display(), line);
            }
            EngineEvent::Chunk { delta, .. } => {
                let _ = write!(stdout, "{delta}");
            }
            EngineEvent::Applied { .. } => {
                let _ = writeln!(stdout, "\n--- applied");
            }
            EngineEvent::Conflict { diagnostic, .. } => {
                let _ = writeln!(stdout, "\n--- {}", diagnostic.message);
            }
            EngineEvent::Failed { error, .. } => {
                let _ = writeln!(stdout, "\n--- failed: {error}");
            }
            EngineEvent::Cancelled { reason, .. } => {
                let _ = writeln!(stdout, "\n--- cancelled: {reason}");
            }
            _ => continue,
        }
        let _ = stdout.flush();
    }
}
