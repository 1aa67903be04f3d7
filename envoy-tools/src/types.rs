use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque id of the reasoning-engine turn that issued a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(String);

impl TurnId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable 1-based task id within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Monotonic transition rules: pending -> in_progress -> {done, failed};
    /// skipped is reachable only from pending. Nothing reverses.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::InProgress)
            | (TaskStatus::Pending, TaskStatus::Skipped)
            | (TaskStatus::Pending, TaskStatus::Done)
            | (TaskStatus::Pending, TaskStatus::Failed)
            | (TaskStatus::InProgress, TaskStatus::Done)
            | (TaskStatus::InProgress, TaskStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested operation from the reasoning engine. Immutable once issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    pub requested_by: TurnId,
    /// Declared plan-task association; the dispatcher mirrors the outcome of
    /// the operation onto this task.
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

impl OperationRequest {
    pub fn new(tool_name: impl Into<String>, arguments: serde_json::Value, turn: TurnId) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            requested_by: turn,
            task_id: None,
        }
    }

    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failure,
}

/// The tool-call response handed back to the reasoning engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub status: ResultStatus,
    pub message: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            status: ResultStatus::Success,
            message: message.into(),
            payload,
            error_kind: None,
        }
    }

    pub fn fail(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Failure,
            message: message.into(),
            payload: serde_json::Value::Null,
            error_kind: Some(kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Skipped));
        assert!(InProgress.can_transition_to(Done));
        assert!(InProgress.can_transition_to(Failed));
        assert!(!InProgress.can_transition_to(Pending));
        assert!(!InProgress.can_transition_to(Skipped));
        assert!(!Done.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Done));
        assert!(!Skipped.can_transition_to(InProgress));
    }

    #[test]
    fn result_serializes_error_kind_snake_case() {
        let result = OperationResult::fail(ErrorKind::RoleHierarchyViolation, "too high");
        let v = serde_json::to_value(&result).expect("serialize result");
        assert_eq!(v["status"], "failure");
        assert_eq!(v["error_kind"], "role_hierarchy_violation");
    }
}
