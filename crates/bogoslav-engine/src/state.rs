//! Request lifecycle of a directive.

use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a directive's model request stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Nothing submitted.
    #[default]
    Idle,
    /// Handed to the transport task.
    Submitted,
    /// The response stream is open.
    AwaitingResponse,
    /// Response received and reconciliation attempted.
    Completed,
    /// Superseded or invalidated before the response arrived.
    Cancelled,
    /// Transport error after all retries.
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether a request is outstanding.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Submitted | Self::AwaitingResponse)
    }

    pub fn can_transition_to(&self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Idle, Submitted)
                | (Submitted, AwaitingResponse)
                | (Submitted, Cancelled)
                | (Submitted, Failed)
                | (AwaitingResponse, Completed)
                | (AwaitingResponse, Cancelled)
                | (AwaitingResponse, Failed)
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: RequestState) -> Result<(), EngineError> {
        if !self.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Submitted => "submitted",
            Self::AwaitingResponse => "awaiting_response",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
