//! The Bogoslav engine.
//!
//! One loop owns every watched file's state. A change event is parsed, its
//! directives are matched against the previous parse, and new or edited
//! dispatchable directives are sent to the model. Replies come back through
//! the [`Dispatcher`] and are merged into the file by the [`reconciler`],
//! which discards any reply whose directive was edited in the meantime.

pub mod dispatcher;
pub mod engine;
pub mod file_state;
pub mod prompt;
pub mod reconciler;
pub mod state;
pub mod tracking;

pub use dispatcher::{DispatchUpdate, Dispatcher, PendingRequest, Submission, TransportMessage};
pub use engine::{Engine, EngineEvent};
pub use file_state::FileState;
pub use prompt::{PromptBuilder, PromptInput};
pub use reconciler::{reconcile, Reconciliation};
pub use state::RequestState;
pub use tracking::{Change, LineDiff, Tracking};

use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request transition from {from} to {to}")]
    InvalidTransition { from: RequestState, to: RequestState },

    #[error(transparent)]
    Watch(#[from] bogoslav_watch::WatchError),

    #[error(transparent)]
    Session(#[from] bogoslav_session::SessionError),
}
