use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

/// Failure reasons surfaced to the reasoning engine on an `OperationResult`.
///
/// These are values, never process-fatal errors: the engine is expected to
/// adapt (skip, retry with different arguments, or ask the human).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArguments,
    UnknownTool,
    RoleHierarchyViolation,
    InsufficientBotPermission,
    TargetNotFound,
    UnsafeOperationBlocked,
    RemoteTransientError,
    RemotePermanentError,
    ConfirmationTimeout,
    AskUserTimeout,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArguments => "invalid_arguments",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::RoleHierarchyViolation => "role_hierarchy_violation",
            ErrorKind::InsufficientBotPermission => "insufficient_bot_permission",
            ErrorKind::TargetNotFound => "target_not_found",
            ErrorKind::UnsafeOperationBlocked => "unsafe_operation_blocked",
            ErrorKind::RemoteTransientError => "remote_transient_error",
            ErrorKind::RemotePermanentError => "remote_permanent_error",
            ErrorKind::ConfirmationTimeout => "confirmation_timeout",
            ErrorKind::AskUserTimeout => "ask_user_timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-dispatch failures: the request never reached the guard or the remote
/// API.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::UnknownTool(_) => ErrorKind::UnknownTool,
            ToolError::InvalidArguments(_) => ErrorKind::InvalidArguments,
        }
    }
}
