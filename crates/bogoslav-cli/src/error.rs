//! CLI error handling.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use bogoslav_common_config::{ConfigError, EnvError};
use bogoslav_common_fs::FsError;
use bogoslav_common_log::LogError;
use bogoslav_engine::EngineError;
use bogoslav_llm::LlmError;
use bogoslav_session::SessionError;
use thiserror::Error;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// CLI error type with stable codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedError>,
        hint: Option<String>,
    },

    #[error("{message}")]
    Io {
        message: String,
        #[source]
        source: Option<BoxedError>,
        path: Option<PathBuf>,
    },

    #[error("{message}")]
    Validation { message: String },

    #[error("{message}")]
    Session {
        message: String,
        #[source]
        source: SessionError,
    },
}

impl CliError {
    /// Get the error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "E001",
            Self::Io { .. } => "E002",
            Self::Validation { .. } => "E004",
            Self::Session { .. } => "E006",
        }
    }

    /// Process status for this error
    pub fn status(&self) -> u8 {
        match self {
            Self::Config { .. } => 2,
            Self::Io { .. } => 3,
            Self::Validation { .. } => 5,
            Self::Session { .. } => 1,
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.status())
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Config { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
            hint: None,
        }
    }

    /// Create a config error with hint
    pub fn config_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
            hint: Some(hint.into()),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Render for stderr, hint included.
    pub fn report(&self) -> String {
        let mut out = format!("error[{}]: {}", self.code(), self);
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(&format!("\n  caused by: {cause}"));
            source = cause.source();
        }
        if let Self::Io {
            path: Some(path), ..
        } = self
        {
            out.push_str(&format!("\n  path: {}", path.display()));
        }
        if let Some(hint) = self.hint() {
            out.push_str(&format!("\n  hint: {hint}"));
        }
        out
    }
}

impl From<io::Error> for CliError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: Some(Box::new(err)),
            path: None,
        }
    }
}

impl From<FsError> for CliError {
    fn from(err: FsError) -> Self {
        let path = match &err {
            FsError::Read { path, .. } | FsError::Write { path, .. } | FsError::NotUtf8 { path } => {
                path.clone()
            }
        };
        Self::Io {
            message: err.to_string(),
            source: None,
            path: Some(path),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io {
            message: format!("failed to encode output: {err}"),
            source: Some(Box::new(err)),
            path: None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::Config {
            message: format!("Configuration error: {err}"),
            source: None,
            hint: Some("Check .bogoslav/config.yaml or the file given with --config".to_string()),
        }
    }
}

impl From<EnvError> for CliError {
    fn from(err: EnvError) -> Self {
        let hint = match &err {
            EnvError::NotSet { var } => format!("export {var}=<your key>"),
            EnvError::InvalidValue { var, .. } => format!("check the value of {var}"),
        };
        Self::config_with_hint(err.to_string(), hint)
    }
}

impl From<LlmError> for CliError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::MissingApiKey(var) => Self::config_with_hint(
                format!("API key not set: {var}"),
                format!("export {var}=<your key> or set model.api_key_env"),
            ),
            other => Self::config(format!("cannot create model provider: {other}")),
        }
    }
}

impl From<LogError> for CliError {
    fn from(err: LogError) -> Self {
        Self::Io {
            message: err.to_string(),
            source: None,
            path: None,
        }
    }
}

impl From<SessionError> for CliError {
    fn from(err: SessionError) -> Self {
        Self::Session {
            message: "session storage failed".to_string(),
            source: err,
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Watch(e) => Self::config_with_hint(
                e.to_string(),
                "pass existing files or directories to watch",
            ),
            EngineError::Session(e) => e.into(),
            other => Self::Io {
                message: other.to_string(),
                source: None,
                path: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_exit_with_two() {
        let err: CliError = LlmError::MissingApiKey("GEMINI_API_KEY".into()).into();
        assert_eq!(err.code(), "E001");
        assert_eq!(err.status(), 2);
        assert!(err.report().contains("hint: export GEMINI_API_KEY"));
    }

    #[test]
    fn test_validation_exit_code() {
        let err = CliError::validation("2 errors");
        assert_eq!(err.status(), 5);
        assert_eq!(err.report(), "error[E004]: 2 errors");
    }
}
