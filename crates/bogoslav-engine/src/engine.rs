//! The event loop.

use crate::dispatcher::{DispatchUpdate, Dispatcher, PendingRequest, Submission, TransportMessage};
use crate::file_state::{FileState, Update};
use crate::prompt::{PromptBuilder, PromptInput};
use crate::reconciler::{reconcile, Reconciliation};
use crate::tracking::Change;
use crate::EngineError;
use bogoslav_common_config::{BogoslavConfig, WatchConfig};
use bogoslav_common_core::{DirectiveId, RequestId, Timestamp};
use bogoslav_common_fs::{content_hash, read_text, write_text, FsError};
use bogoslav_common_log::file_span;
use bogoslav_directive::{Diagnostic, Directive, DirectiveForm, Role, Severity};
use bogoslav_llm::{LlmProvider, RetryPolicy};
use bogoslav_session::{SessionKey, SessionStore};
use bogoslav_watch::{ChangeEvent, FileWatcher, SelfWriteGuard};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn, Instrument};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Something the engine did, for whoever is listening.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Loaded {
        path: PathBuf,
        directives: usize,
    },
    Diagnostic {
        path: PathBuf,
        diagnostic: Diagnostic,
    },
    Submitted {
        path: PathBuf,
        directive: DirectiveId,
        request: RequestId,
        line: usize,
    },
    Accepted {
        directive: DirectiveId,
        request: RequestId,
    },
    Chunk {
        directive: DirectiveId,
        request: RequestId,
        delta: String,
    },
    Retrying {
        directive: DirectiveId,
        request: RequestId,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Cancelled {
        path: PathBuf,
        directive: DirectiveId,
        request: RequestId,
        reason: &'static str,
    },
    Applied {
        path: PathBuf,
        directive: DirectiveId,
        version: u64,
    },
    Conflict {
        path: PathBuf,
        directive: DirectiveId,
        diagnostic: Diagnostic,
    },
    Failed {
        path: PathBuf,
        directive: DirectiveId,
        error: String,
    },
}

/// Ties watched files, directives, model requests and sessions together.
///
/// All file state lives here and is only touched from the loop; model calls
/// run as spawned tasks that report back through the dispatcher's channel.
pub struct Engine {
    sessions: Arc<SessionStore>,
    guard: SelfWriteGuard,
    dispatcher: Dispatcher,
    transport: mpsc::Receiver<TransportMessage>,
    prompts: PromptBuilder,
    files: HashMap<PathBuf, FileState>,
    events: broadcast::Sender<EngineEvent>,
    dispatch_existing: bool,
}

impl Engine {
    pub fn new(
        config: &BogoslavConfig,
        provider: Arc<dyn LlmProvider>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let (dispatcher, transport) = Dispatcher::new(provider, RetryPolicy::from(&config.retry));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sessions,
            guard: SelfWriteGuard::new(),
            dispatcher,
            transport,
            prompts: PromptBuilder::new(config.model.clone(), config.dispatch.clone()),
            files: HashMap::new(),
            events,
            dispatch_existing: config.dispatch.dispatch_existing,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// A watcher sharing this engine's self-write guard.
    pub fn watcher(&self, config: &WatchConfig) -> Result<FileWatcher, EngineError> {
        Ok(FileWatcher::new(config, self.guard.clone())?)
    }

    pub fn guard(&self) -> &SelfWriteGuard {
        &self.guard
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn file(&self, path: &Path) -> Option<&FileState> {
        self.files.get(path)
    }

    pub fn pending_count(&self) -> usize {
        self.dispatcher.pending_count()
    }

    pub fn provider(&self) -> &dyn LlmProvider {
        self.dispatcher.provider()
    }

    /// Drive the loop until `shutdown` resolves or the watcher stops.
    ///
    /// Persisted sessions are loaded first and saved on the way out.
    pub async fn run<F>(mut self, mut watcher: FileWatcher, shutdown: F) -> Result<(), EngineError>
    where
        F: Future<Output = ()>,
    {
        let restored = self.sessions.load().await?;
        if restored > 0 {
            info!(sessions = restored, "sessions restored");
        }

        for event in watcher.initial_events() {
            self.handle_change(event).await;
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
                event = watcher.next_event() => match event {
                    Some(event) => self.handle_change(event).await,
                    None => {
                        warn!("file watcher stopped");
                        break;
                    }
                },
                Some(message) = self.transport.recv() => self.handle_transport(message).await,
            }
        }

        self.shutdown().await
    }

    /// Cancel outstanding requests and persist sessions.
    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        for pending in self.dispatcher.cancel_all() {
            self.emit_cancelled(&pending, "shutdown");
        }
        self.sessions.save().await?;
        Ok(())
    }

    /// Wait for the next message from a transport task.
    pub async fn next_transport(&mut self) -> Option<TransportMessage> {
        self.transport.recv().await
    }

    /// Handle transport messages until no request is pending.
    pub async fn settle(&mut self) {
        while self.dispatcher.pending_count() > 0 {
            match self.transport.recv().await {
                Some(message) => self.handle_transport(message).await,
                None => break,
            }
        }
    }

    /// Accept a change event for a watched file.
    pub async fn handle_change(&mut self, event: ChangeEvent) {
        let span = file_span(&event.path);
        self.apply_change(event).instrument(span).await;
    }

    async fn apply_change(&mut self, event: ChangeEvent) {
        let path = event.path.clone();
        let (update, first_sighting) = match self.files.get_mut(&path) {
            Some(file) if file.hash() == event.hash => {
                debug!("content unchanged");
                return;
            }
            Some(file) => (file.accept(event.content, event.hash), false),
            None => {
                let (file, update) = FileState::load(&path, event.content, event.hash);
                info!(directives = file.doc().directives.len(), "file loaded");
                self.emit(EngineEvent::Loaded {
                    path: path.clone(),
                    directives: file.doc().directives.len(),
                });
                self.files.insert(path.clone(), file);
                (update, true)
            }
        };

        self.report_diagnostics(&path, &update.fresh_diagnostics);

        for id in &update.tracking.removed {
            if let Some(pending) = self.dispatcher.cancel(id) {
                self.emit_cancelled(&pending, "directive removed");
            }
        }

        for index in self.dispatch_targets(&path, &update, first_sighting) {
            self.submit(&path, index).await;
        }
    }

    /// Accept disk content the watcher has not delivered yet, so a reply is
    /// never reconciled against stale text.
    async fn catch_up(&mut self, path: &Path) -> Result<(), FsError> {
        let content = read_text(path)?;
        let hash = content_hash(content.as_bytes());
        if self.files.get(path).is_some_and(|file| file.hash() == hash) {
            return Ok(());
        }
        debug!("file changed on disk ahead of its change event");
        self.apply_change(ChangeEvent {
            path: path.to_path_buf(),
            timestamp: Timestamp::now(),
            content,
            hash,
        })
        .await;
        Ok(())
    }

    /// Indices of directives needing a request after `update`, cancelling
    /// requests the update superseded.
    fn dispatch_targets(&mut self, path: &Path, update: &Update, first_sighting: bool) -> Vec<usize> {
        let Some(file) = self.files.get(path) else {
            return Vec::new();
        };
        let mut targets = Vec::new();

        for (index, change) in update.tracking.changes.iter().enumerate() {
            let directive = &file.doc().directives[index];
            match change {
                Change::Unchanged => {}
                Change::New => {
                    if first_sighting && !self.dispatch_existing {
                        continue;
                    }
                    if directive.is_dispatchable() && !file.doc().is_answered(index, file.text()) {
                        targets.push(index);
                    }
                }
                Change::Modified => {
                    if let Some(pending) = self.dispatcher.cancel(&update.tracking.ids[index]) {
                        self.emit_cancelled(&pending, "directive edited");
                    }
                    if directive.is_dispatchable() {
                        targets.push(index);
                    }
                }
            }
        }
        targets
    }

    async fn submit(&mut self, path: &Path, index: usize) {
        let Some(file) = self.files.get(path) else {
            return;
        };
        let directive = &file.doc().directives[index];
        let id = file.ids()[index];
        let session = session_key(path, directive);

        let history = match directive.form {
            DirectiveForm::Inline => self.sessions.history(&session).await,
            DirectiveForm::Block => Vec::new(),
        };
        let request = self.prompts.build(&PromptInput {
            path,
            text: file.text(),
            doc: file.doc(),
            index,
            history: &history,
        });
        let submission = Submission {
            directive: id,
            path: path.to_path_buf(),
            version: file.version(),
            snapshot: file.text().to_string(),
            span: directive.span.clone(),
            raw: directive.raw.clone(),
            region: file.protected_region(index),
            session,
            prompt: directive.prompt_text().to_string(),
        };
        let line = directive.span.display_line();

        let request = self.dispatcher.submit(submission, request);
        self.emit(EngineEvent::Submitted {
            path: path.to_path_buf(),
            directive: id,
            request,
            line,
        });
    }

    /// Apply a message from a transport task.
    pub async fn handle_transport(&mut self, message: TransportMessage) {
        let Some(update) = self.dispatcher.handle(message) else {
            return;
        };

        match update {
            DispatchUpdate::Accepted { directive, request } => {
                debug!(directive = %directive.short(), request = %request.short(), "response stream open");
                self.emit(EngineEvent::Accepted { directive, request });
            }
            DispatchUpdate::Chunk {
                directive,
                request,
                delta,
            } => self.emit(EngineEvent::Chunk {
                directive,
                request,
                delta,
            }),
            DispatchUpdate::Retrying {
                directive,
                request,
                attempt,
                delay,
                error,
            } => self.emit(EngineEvent::Retrying {
                directive,
                request,
                attempt,
                delay,
                error,
            }),
            DispatchUpdate::Completed { pending, reply } => {
                let span = file_span(pending.path());
                self.complete(pending, reply).instrument(span).await;
            }
            DispatchUpdate::Failed { pending, error } => {
                warn!(
                    path = %pending.path().display(),
                    line = pending.submission.span.display_line(),
                    directive = %pending.directive().short(),
                    error = %error,
                    "request failed"
                );
                self.emit(EngineEvent::Failed {
                    path: pending.path().to_path_buf(),
                    directive: pending.directive(),
                    error: error.to_string(),
                });
            }
        }
    }

    async fn complete(&mut self, pending: PendingRequest, reply: String) {
        let submission = &pending.submission;
        if !self.files.contains_key(&submission.path) {
            warn!(path = %submission.path.display(), "reply for a file no longer tracked");
            return;
        }
        if let Err(e) = self.catch_up(&submission.path).await {
            error!(error = %e, "cannot re-read file before writing reply");
            self.emit(EngineEvent::Failed {
                path: submission.path.clone(),
                directive: pending.directive(),
                error: e.to_string(),
            });
            return;
        }
        let Some(file) = self.files.get_mut(&submission.path) else {
            return;
        };

        let text = match reconcile(submission, file, &reply) {
            Reconciliation::Apply { text } => text,
            Reconciliation::ConflictDiscard(diagnostic) => {
                warn!(
                    line = diagnostic.span.display_line(),
                    directive = %pending.directive().short(),
                    reason = %diagnostic.message,
                    "reply discarded"
                );
                self.emit(EngineEvent::Conflict {
                    path: submission.path.clone(),
                    directive: pending.directive(),
                    diagnostic,
                });
                return;
            }
        };

        let hash = match write_text(&submission.path, &text) {
            Ok(hash) => hash,
            Err(e) => {
                error!(error = %e, "failed to write reply");
                self.emit(EngineEvent::Failed {
                    path: submission.path.clone(),
                    directive: pending.directive(),
                    error: e.to_string(),
                });
                return;
            }
        };
        self.guard.register(&submission.path, hash.clone());
        file.record_write(text, hash);
        let version = file.version();

        self.sessions
            .append(
                &submission.session,
                Role::User,
                submission.prompt.clone(),
                Some(pending.directive()),
            )
            .await;
        self.sessions
            .append(
                &submission.session,
                Role::Model,
                reply.trim(),
                Some(pending.directive()),
            )
            .await;

        info!(
            directive = %pending.directive().short(),
            request = %pending.request_id.short(),
            version,
            "reply applied"
        );
        self.emit(EngineEvent::Applied {
            path: submission.path.clone(),
            directive: pending.directive(),
            version,
        });
    }

    fn report_diagnostics(&self, path: &Path, diagnostics: &[Diagnostic]) {
        for diagnostic in diagnostics {
            let line = diagnostic.span.display_line();
            match diagnostic.severity {
                Severity::Error => warn!(line, message = %diagnostic.message, "directive error"),
                Severity::Warning => info!(line, message = %diagnostic.message, "directive warning"),
                Severity::Info => debug!(line, message = %diagnostic.message, "directive note"),
            }
            self.emit(EngineEvent::Diagnostic {
                path: path.to_path_buf(),
                diagnostic: diagnostic.clone(),
            });
        }
    }

    fn emit_cancelled(&self, pending: &PendingRequest, reason: &'static str) {
        info!(
            directive = %pending.directive().short(),
            request = %pending.request_id.short(),
            reason,
            "request cancelled"
        );
        self.emit(EngineEvent::Cancelled {
            path: pending.path().to_path_buf(),
            directive: pending.directive(),
            request: pending.request_id,
            reason,
        });
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Session of a directive: its `session` parameter, else its file.
fn session_key(path: &Path, directive: &Directive) -> SessionKey {
    match directive.param("session") {
        Some(name) if !name.trim().is_empty() => SessionKey::named(name.trim()),
        _ => SessionKey::for_file(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bogoslav_directive::parse;

    #[test]
    fn test_session_key_prefers_parameter() {
        let doc = parse("[[ask :session \"research\" : q]] [[ask: r]]\n");
        let path = Path::new("/tmp/notes.md");
        assert_eq!(
            session_key(path, &doc.directives[0]),
            SessionKey::named("research")
        );
        assert_eq!(
            session_key(path, &doc.directives[1]),
            SessionKey::for_file(path)
        );
    }
}
