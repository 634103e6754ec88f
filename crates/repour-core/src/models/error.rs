use thiserror::Error;

use crate::models::TaskId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    Config,
    Precondition,
    Launch,
    ToolFailure,
    ResultArtifact,
    Cancelled,
    DuplicateTask,
    Delivery,
    Internal,
}

impl CoreErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::Config => "config",
            Self::Precondition => "precondition",
            Self::Launch => "launch",
            Self::ToolFailure => "tool_failure",
            Self::ResultArtifact => "result_artifact",
            Self::Cancelled => "cancelled",
            Self::DuplicateTask => "duplicate_task",
            Self::Delivery => "delivery",
            Self::Internal => "internal",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub task_id: Option<TaskId>,
    pub strategy: Option<String>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task_id: None,
            strategy: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_task(mut self, task_id: &TaskId) -> Self {
        self.task_id.get_or_insert_with(|| task_id.clone());
        self
    }

    pub fn for_strategy(mut self, strategy: &str) -> Self {
        self.strategy.get_or_insert_with(|| strategy.to_string());
        self
    }
}
