//! Session types.

use bogoslav_common_core::{DirectiveId, Timestamp};
pub use bogoslav_directive::Role;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Key identifying a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Session bound to a watched file.
    pub fn for_file(path: &Path) -> Self {
        Self(format!("file:{}", path.display()))
    }

    /// Session named with the `:session` parameter.
    pub fn named(name: &str) -> Self {
        Self(format!("name:{}", name.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One recorded turn. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTurn {
    /// Position in the session, starting at 1.
    pub ordinal: u64,
    pub role: Role,
    pub content: String,
    /// Directive that produced the turn.
    pub directive: Option<DirectiveId>,
    pub timestamp: Timestamp,
}

/// A session history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub created_at: Timestamp,
    pub turns: Vec<SessionTurn>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            created_at: Timestamp::now(),
            turns: Vec::new(),
        }
    }

    /// Record a turn with the next ordinal.
    pub fn push(
        &mut self,
        role: Role,
        content: String,
        directive: Option<DirectiveId>,
    ) -> SessionTurn {
        let ordinal = self.turns.last().map(|t| t.ordinal + 1).unwrap_or(1);
        let turn = SessionTurn {
            ordinal,
            role,
            content,
            directive,
            timestamp: Timestamp::now(),
        };
        self.turns.push(turn.clone());
        turn
    }

    pub fn last_activity(&self) -> Timestamp {
        self.turns
            .last()
            .map(|t| t.timestamp)
            .unwrap_or(self.created_at)
    }
}
