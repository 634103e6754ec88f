use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, TaskId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TerminalState {
    #[serde(rename = "SUCCESS")]
    Succeeded,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedRepository {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub releases: bool,
    #[serde(default)]
    pub snapshots: bool,
}

/// Strategy-agnostic result document.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustResultData {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub removed_repositories: Vec<RemovedRepository>,
}

/// Terminal result of one task. Built once through the constructors below;
/// the result document only exists on success and the error only on failure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutcomeRecord {
    task_id: TaskId,
    state: TerminalState,
    adjust_type: Option<String>,
    result: Option<AdjustResultData>,
    error: Option<CoreError>,
    log_tail: Vec<String>,
    finished_at: SystemTime,
}

impl OutcomeRecord {
    pub fn succeeded(
        task_id: TaskId,
        adjust_type: impl Into<String>,
        result: AdjustResultData,
        log_tail: Vec<String>,
    ) -> Self {
        Self {
            task_id,
            state: TerminalState::Succeeded,
            adjust_type: Some(adjust_type.into()),
            result: Some(result),
            error: None,
            log_tail,
            finished_at: SystemTime::now(),
        }
    }

    pub fn failed(task_id: TaskId, error: CoreError, log_tail: Vec<String>) -> Self {
        Self {
            task_id,
            state: TerminalState::Failed,
            adjust_type: None,
            result: None,
            error: Some(error),
            log_tail,
            finished_at: SystemTime::now(),
        }
    }

    pub fn cancelled(task_id: TaskId, log_tail: Vec<String>) -> Self {
        Self {
            task_id,
            state: TerminalState::Cancelled,
            adjust_type: None,
            result: None,
            error: None,
            log_tail,
            finished_at: SystemTime::now(),
        }
    }

    pub fn with_adjust_type(mut self, adjust_type: Option<String>) -> Self {
        if self.adjust_type.is_none() {
            self.adjust_type = adjust_type;
        }
        self
    }

    /// Stamps the failing task and strategy onto the error, keeping any
    /// attribution it already carries.
    pub fn with_error_context(mut self, task_id: &TaskId, strategy: &str) -> Self {
        self.error = self
            .error
            .map(|error| error.for_task(task_id).for_strategy(strategy));
        self
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn state(&self) -> TerminalState {
        self.state
    }

    pub fn adjust_type(&self) -> Option<&str> {
        self.adjust_type.as_deref()
    }

    pub fn result(&self) -> Option<&AdjustResultData> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&CoreError> {
        self.error.as_ref()
    }

    pub fn log_tail(&self) -> &[String] {
        &self.log_tail
    }

    pub fn finished_at(&self) -> SystemTime {
        self.finished_at
    }

    pub fn to_payload(&self) -> CallbackPayload {
        CallbackPayload {
            task_id: self.task_id.clone(),
            status: self.state,
            adjust_type: self.adjust_type.clone(),
            result_data: self.result.clone(),
            error_kind: self.error.as_ref().map(|error| error.kind.as_str().to_string()),
            error_detail: self.error.as_ref().map(|error| error.message.clone()),
        }
    }
}

/// Wire shape delivered to the caller's callback destination.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub task_id: TaskId,
    pub status: TerminalState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjust_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<AdjustResultData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}
