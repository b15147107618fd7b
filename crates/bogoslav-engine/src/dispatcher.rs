//! Request lifecycle: submit, await, cancel, retry.
//!
//! Each submission runs as a spawned task that reports back over an mpsc
//! channel. The dispatcher keeps at most one [`PendingRequest`] per
//! directive; messages carrying an unknown request id are stale and dropped.

use crate::state::RequestState;
use bogoslav_common_core::{DirectiveId, RequestId, Timestamp};
use bogoslav_common_log::request_span;
use bogoslav_directive::Span;
use bogoslav_llm::{LlmError, LlmProvider, LlmRequest, RetryPolicy};
use bogoslav_session::SessionKey;
use futures::StreamExt;
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

const TRANSPORT_CHANNEL_CAPACITY: usize = 256;

/// What a transport task reports.
#[derive(Debug)]
pub enum TransportMessage {
    Accepted {
        request: RequestId,
    },
    Chunk {
        request: RequestId,
        delta: String,
    },
    Retrying {
        request: RequestId,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Finished {
        request: RequestId,
        outcome: Result<String, LlmError>,
    },
}

impl TransportMessage {
    pub fn request(&self) -> RequestId {
        match self {
            Self::Accepted { request }
            | Self::Chunk { request, .. }
            | Self::Retrying { request, .. }
            | Self::Finished { request, .. } => *request,
        }
    }
}

/// Directive and file state captured at submission time.
#[derive(Debug, Clone)]
pub struct Submission {
    pub directive: DirectiveId,
    pub path: PathBuf,
    pub version: u64,
    pub snapshot: String,
    pub span: Span,
    /// Source text of the directive at submission.
    pub raw: String,
    /// Directive lines plus answer slot lines, in `snapshot`.
    pub region: Range<usize>,
    pub session: SessionKey,
    /// User turn recorded when the reply is applied.
    pub prompt: String,
}

/// An outstanding model request.
#[derive(Debug)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub submitted_at: Timestamp,
    pub cancel: CancellationToken,
    pub state: RequestState,
    pub submission: Submission,
}

impl PendingRequest {
    pub fn directive(&self) -> DirectiveId {
        self.submission.directive
    }

    pub fn path(&self) -> &Path {
        &self.submission.path
    }
}

/// Outcome of handling a transport message.
#[derive(Debug)]
pub enum DispatchUpdate {
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
    /// The request left the pending set with a reply; state is `Completed`.
    Completed {
        pending: PendingRequest,
        reply: String,
    },
    /// The request left the pending set; state is `Failed`.
    Failed {
        pending: PendingRequest,
        error: LlmError,
    },
}

pub struct Dispatcher {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    sender: mpsc::Sender<TransportMessage>,
    pending: HashMap<DirectiveId, PendingRequest>,
}

impl Dispatcher {
    /// Create a dispatcher and the receiving end of its transport channel.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        retry: RetryPolicy,
    ) -> (Self, mpsc::Receiver<TransportMessage>) {
        let (sender, receiver) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);
        let dispatcher = Self {
            provider,
            retry,
            sender,
            pending: HashMap::new(),
        };
        (dispatcher, receiver)
    }

    pub fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }

    /// Submit a request for a directive, superseding any outstanding one.
    pub fn submit(&mut self, submission: Submission, request: LlmRequest) -> RequestId {
        let directive = submission.directive;
        if let Some(previous) = self.cancel(&directive) {
            debug!(
                directive = %directive.short(),
                request = %previous.request_id.short(),
                "superseded"
            );
        }

        let request_id = RequestId::new();
        let cancel = CancellationToken::new();
        let mut state = RequestState::Idle;
        // Idle -> Submitted is always legal.
        let _ = state.transition(RequestState::Submitted);

        let span = request_span(&request_id.short(), &directive.short());
        tokio::spawn(
            run_request(
                Arc::clone(&self.provider),
                self.retry,
                request,
                request_id,
                cancel.clone(),
                self.sender.clone(),
            )
            .instrument(span),
        );

        info!(
            path = %submission.path.display(),
            directive = %directive.short(),
            request = %request_id.short(),
            version = submission.version,
            "request submitted"
        );
        self.pending.insert(
            directive,
            PendingRequest {
                request_id,
                submitted_at: Timestamp::now(),
                cancel,
                state,
                submission,
            },
        );
        request_id
    }

    /// Cancel the outstanding request of `directive`, if any.
    ///
    /// Cancellation is advisory: the task is told to stop and anything it
    /// still sends is ignored.
    pub fn cancel(&mut self, directive: &DirectiveId) -> Option<PendingRequest> {
        let mut pending = self.pending.remove(directive)?;
        pending.cancel.cancel();
        if let Err(e) = pending.state.transition(RequestState::Cancelled) {
            warn!(error = %e, "cancelling request");
        }
        Some(pending)
    }

    /// Cancel every outstanding request.
    pub fn cancel_all(&mut self) -> Vec<PendingRequest> {
        let directives: Vec<DirectiveId> = self.pending.keys().copied().collect();
        directives
            .iter()
            .filter_map(|directive| self.cancel(directive))
            .collect()
    }

    pub fn pending(&self, directive: &DirectiveId) -> Option<&PendingRequest> {
        self.pending.get(directive)
    }

    pub fn is_pending(&self, directive: &DirectiveId) -> bool {
        self.pending.contains_key(directive)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Apply a transport message.
    ///
    /// Returns `None` for stale messages and for nothing worth reporting.
    pub fn handle(&mut self, message: TransportMessage) -> Option<DispatchUpdate> {
        let request = message.request();
        let Some(directive) = self
            .pending
            .values()
            .find(|p| p.request_id == request)
            .map(PendingRequest::directive)
        else {
            debug!(request = %request.short(), "stale transport message ignored");
            return None;
        };

        match message {
            TransportMessage::Accepted { .. } => {
                let pending = self.pending.get_mut(&directive)?;
                if pending.state == RequestState::AwaitingResponse {
                    // Re-accepted after a retry.
                    return None;
                }
                pending.state.transition(RequestState::AwaitingResponse).ok()?;
                Some(DispatchUpdate::Accepted { directive, request })
            }
            TransportMessage::Chunk { delta, .. } => Some(DispatchUpdate::Chunk {
                directive,
                request,
                delta,
            }),
            TransportMessage::Retrying {
                attempt,
                delay,
                error,
                ..
            } => Some(DispatchUpdate::Retrying {
                directive,
                request,
                attempt,
                delay,
                error,
            }),
            TransportMessage::Finished { outcome, .. } => {
                let mut pending = self.pending.remove(&directive)?;
                match outcome {
                    Ok(reply) => {
                        // Providers may finish without an explicit accept.
                        if pending.state == RequestState::Submitted {
                            let _ = pending.state.transition(RequestState::AwaitingResponse);
                        }
                        let _ = pending.state.transition(RequestState::Completed);
                        Some(DispatchUpdate::Completed { pending, reply })
                    }
                    Err(error) => {
                        let _ = pending.state.transition(RequestState::Failed);
                        Some(DispatchUpdate::Failed { pending, error })
                    }
                }
            }
        }
    }
}

async fn run_request(
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    request: LlmRequest,
    request_id: RequestId,
    cancel: CancellationToken,
    sender: mpsc::Sender<TransportMessage>,
) {
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("request cancelled");
            return;
        }
        outcome = stream_with_retry(provider.as_ref(), &retry, &request, request_id, &sender) => outcome,
    };

    let _ = sender
        .send(TransportMessage::Finished {
            request: request_id,
            outcome,
        })
        .await;
}

async fn stream_with_retry(
    provider: &dyn LlmProvider,
    retry: &RetryPolicy,
    request: &LlmRequest,
    request_id: RequestId,
    sender: &mpsc::Sender<TransportMessage>,
) -> Result<String, LlmError> {
    let mut attempt = 0;
    loop {
        let error = match stream_once(provider, request.clone(), request_id, sender).await {
            Ok(reply) => return Ok(reply),
            Err(error) => error,
        };
        let Some(delay) = retry.next_delay(attempt, &error) else {
            return Err(error);
        };

        attempt += 1;
        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying request");
        let _ = sender
            .send(TransportMessage::Retrying {
                request: request_id,
                attempt,
                delay,
                error: error.to_string(),
            })
            .await;
        tokio::time::sleep(delay).await;
    }
}

async fn stream_once(
    provider: &dyn LlmProvider,
    request: LlmRequest,
    request_id: RequestId,
    sender: &mpsc::Sender<TransportMessage>,
) -> Result<String, LlmError> {
    let mut stream = provider.complete_stream(request).await?;
    let _ = sender
        .send(TransportMessage::Accepted {
            request: request_id,
        })
        .await;

    let mut reply = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if !chunk.delta.is_empty() {
            reply.push_str(&chunk.delta);
            let _ = sender
                .send(TransportMessage::Chunk {
                    request: request_id,
                    delta: chunk.delta,
                })
                .await;
        }
        if chunk.is_complete {
            break;
        }
    }

    if reply.trim().is_empty() {
        return Err(LlmError::Parse("empty response".to_string()));
    }
    Ok(reply)
}
