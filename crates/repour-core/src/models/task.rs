use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Server-side id for requests that arrive without one.
    pub fn generate() -> Self {
        static SEQUENCE: AtomicU64 = AtomicU64::new(0);

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("adjust-{millis:x}-{}-{sequence}", std::process::id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a live registry entry. Terminal states live on the outcome
/// record; the entry is gone by then.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallbackMethod {
    #[default]
    Post,
    Put,
}

impl CallbackMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CallbackDestination {
    pub url: String,
    #[serde(default)]
    pub method: CallbackMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl CallbackDestination {
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: CallbackMethod::Post,
            headers: BTreeMap::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Inbound adjust request as handed over by the HTTP layer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustRequest {
    #[serde(default)]
    pub task_id: Option<TaskId>,
    pub adjust_strategy: String,
    pub working_directory: PathBuf,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub callback_destination: Option<CallbackDestination>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdjustTask {
    pub id: TaskId,
    pub strategy: String,
    pub working_dir: PathBuf,
    pub parameters: BTreeMap<String, String>,
    pub created_at: SystemTime,
}

impl AdjustTask {
    pub fn new(id: TaskId, strategy: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            strategy: strategy.into(),
            working_dir: working_dir.into(),
            parameters: BTreeMap::new(),
            created_at: SystemTime::now(),
        }
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn from_request(request: &AdjustRequest) -> Self {
        Self {
            id: request.task_id.clone().unwrap_or_else(TaskId::generate),
            strategy: request.adjust_strategy.clone(),
            working_dir: request.working_directory.clone(),
            parameters: request.parameters.clone(),
            created_at: SystemTime::now(),
        }
    }
}
