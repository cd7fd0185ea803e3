//! Error types for muster.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::util::retry::RetryAttempt;

/// Primary error type for all muster operations.
#[derive(Error, Debug)]
pub enum MusterError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0} connection strategy is not initialized")]
    NotInitialized(String),

    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("Connection to '{server}' failed: {message}")]
    ConnectionFailed { server: String, message: String },

    #[error("Connection to '{server}' timed out after {timeout_ms}ms")]
    ConnectionTimeout { server: String, timeout_ms: u64 },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error from '{server}': {message}")]
    Protocol { server: String, message: String },

    #[error("Tool execution error in {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error(
        "Retry exhausted{} after {attempts} attempt(s): {last_error}",
        server_suffix(.server.as_deref())
    )]
    RetryExhausted {
        server: Option<String>,
        attempts: u32,
        #[source]
        last_error: Box<MusterError>,
        history: Vec<RetryAttempt>,
    },

    #[error(
        "Recovery timed out{}: budget {budget_ms}ms, elapsed {elapsed_ms}ms over {attempts} attempt(s)",
        server_suffix(.server.as_deref())
    )]
    RecoveryTimeout {
        server: Option<String>,
        budget_ms: u64,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
        attempts: u32,
    },

    #[error("'{name}' is already registered by server '{server}'")]
    DuplicateName { name: String, server: String },

    #[error("'{name}' from server '{server}' conflicts with server '{existing_server}'")]
    NameConflict {
        name: String,
        server: String,
        existing_server: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

fn server_suffix(server: Option<&str>) -> String {
    server.map(|s| format!(" for '{s}'")).unwrap_or_default()
}

impl MusterError {
    /// Create a connection failure for a server.
    pub fn connection_failed(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_)
            | Self::NotInitialized(_)
            | Self::UnknownServer(_)
            | Self::TomlParse(_) => ErrorCategory::Configuration,
            Self::ConnectionFailed { .. } | Self::Transport(_) | Self::Io(_) => {
                ErrorCategory::Connection
            }
            Self::ConnectionTimeout { .. } | Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::RetryExhausted { .. } | Self::RecoveryTimeout { .. } => ErrorCategory::Recovery,
            Self::DuplicateName { .. } | Self::NameConflict { .. } => ErrorCategory::Conflict,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Cancelled(_) => ErrorCategory::Cancelled,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Timeout
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Connection => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Conflict => RecoverySuggestion::RenameOrNamespace,
            ErrorCategory::Recovery => RecoverySuggestion::CheckServerHealth,
            ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolImplementation,
            _ => RecoverySuggestion::ContactSupport,
        }
    }

    /// Server name attached to this error, if any.
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::UnknownServer(server)
            | Self::ConnectionFailed { server, .. }
            | Self::ConnectionTimeout { server, .. }
            | Self::Protocol { server, .. }
            | Self::DuplicateName { server, .. }
            | Self::NameConflict { server, .. } => Some(server),
            Self::RetryExhausted { server, .. } | Self::RecoveryTimeout { server, .. } => {
                server.as_deref()
            }
            _ => None,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, MusterError>;
