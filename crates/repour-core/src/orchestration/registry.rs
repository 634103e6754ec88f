use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use tokio::sync::Notify;

use crate::execution::TaskCancellationToken;
use crate::models::{CoreError, CoreErrorKind, TaskId, TaskState};
use crate::orchestration::OrchestrationResult;

/// Process-wide table of live tasks. Owns the only cancellation handle of
/// each task; every mutation happens under one lock so a cancel racing a
/// release either reaches the live token or finds nothing. A live entry may
/// also claim a working directory, which no other live entry can claim.
#[derive(Default)]
pub struct TaskRegistry {
    state: Mutex<HashMap<TaskId, RegistryEntry>>,
    idle: Notify,
}

struct RegistryEntry {
    token: TaskCancellationToken,
    state: TaskState,
    work_dir: Option<PathBuf>,
    registered_at: SystemTime,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegistrySnapshot {
    pub task_id: TaskId,
    pub state: TaskState,
    pub cancel_requested: bool,
    pub work_dir: Option<PathBuf>,
    pub registered_at: SystemTime,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task_id: &TaskId) -> OrchestrationResult<TaskCancellationToken> {
        self.insert(task_id, None)
    }

    /// Registers `task_id` and claims `work_dir` for it until release. The
    /// directory is compared in canonical form when it exists.
    pub fn register_in(
        &self,
        task_id: &TaskId,
        work_dir: &Path,
    ) -> OrchestrationResult<TaskCancellationToken> {
        let work_dir = std::fs::canonicalize(work_dir).unwrap_or_else(|_| work_dir.to_path_buf());
        self.insert(task_id, Some(work_dir))
    }

    /// Registers `task_id` in `work_dir` and ties its release to the returned
    /// guard.
    pub fn register_guarded(
        self: &Arc<Self>,
        task_id: &TaskId,
        work_dir: &Path,
    ) -> OrchestrationResult<TaskRegistration> {
        let token = self.register_in(task_id, work_dir)?;
        Ok(TaskRegistration {
            registry: Arc::clone(self),
            task_id: task_id.clone(),
            token,
            released: false,
        })
    }

    fn insert(
        &self,
        task_id: &TaskId,
        work_dir: Option<PathBuf>,
    ) -> OrchestrationResult<TaskCancellationToken> {
        let mut entries = self.lock_state();
        if entries.contains_key(task_id) {
            return Err(CoreError::new(
                CoreErrorKind::DuplicateTask,
                format!("task '{task_id}' is already registered"),
            )
            .for_task(task_id));
        }

        if let Some(dir) = &work_dir
            && let Some((holder, _)) = entries
                .iter()
                .find(|(_, entry)| entry.work_dir.as_ref() == Some(dir))
        {
            return Err(CoreError::new(
                CoreErrorKind::DuplicateTask,
                format!(
                    "working directory '{}' is in use by task '{holder}'",
                    dir.display()
                ),
            )
            .for_task(task_id));
        }

        let token = TaskCancellationToken::new();
        entries.insert(
            task_id.clone(),
            RegistryEntry {
                token: token.clone(),
                state: TaskState::Pending,
                work_dir,
                registered_at: SystemTime::now(),
            },
        );
        tracing::debug!(task_id = %task_id, live = entries.len(), "registered task");

        Ok(token)
    }

    /// Signals the task's cancellation handle. Returns whether a live task was
    /// found, not whether its process has stopped.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let entries = self.lock_state();
        let Some(entry) = entries.get(task_id) else {
            tracing::debug!(task_id = %task_id, "cancel requested for unknown task");
            return false;
        };

        if entry.token.cancel() {
            tracing::info!(task_id = %task_id, state = ?entry.state, "cancellation signalled");
        } else {
            tracing::debug!(task_id = %task_id, "cancellation already signalled");
        }
        true
    }

    pub fn cancel_all(&self) -> usize {
        let entries = self.lock_state();
        entries
            .values()
            .filter(|entry| entry.token.cancel())
            .count()
    }

    pub fn release(&self, task_id: &TaskId) -> bool {
        let mut entries = self.lock_state();
        let removed = entries.remove(task_id).is_some();
        let now_idle = entries.is_empty();
        drop(entries);

        if removed {
            tracing::debug!(task_id = %task_id, "released task");
        }
        if now_idle {
            self.idle.notify_waiters();
        }
        removed
    }

    pub fn mark_running(&self, task_id: &TaskId) -> bool {
        let mut entries = self.lock_state();
        match entries.get_mut(task_id) {
            Some(entry) => {
                entry.state = TaskState::Running;
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, task_id: &TaskId) -> Option<RegistrySnapshot> {
        let entries = self.lock_state();
        entries.get(task_id).map(|entry| RegistrySnapshot {
            task_id: task_id.clone(),
            state: entry.state,
            cancel_requested: entry.token.is_cancelled(),
            work_dir: entry.work_dir.clone(),
            registered_at: entry.registered_at,
        })
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.lock_state().contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.lock_state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().is_empty()
    }

    /// Waits until no task is registered. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                if self.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    // Entries are plain values, so a panic elsewhere cannot leave one half-written.
    fn lock_state(&self) -> MutexGuard<'_, HashMap<TaskId, RegistryEntry>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Live registration of one task. Dropping it releases the registry entry,
/// so the entry cannot outlive the task even if the task body panics.
pub struct TaskRegistration {
    registry: Arc<TaskRegistry>,
    task_id: TaskId,
    token: TaskCancellationToken,
    released: bool,
}

impl TaskRegistration {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn token(&self) -> &TaskCancellationToken {
        &self.token
    }

    pub fn release(mut self) {
        self.released = true;
        let removed = self.registry.release(&self.task_id);
        assert!(
            removed,
            "task '{}' vanished from the registry while its registration was live",
            self.task_id
        );
    }
}

impl Drop for TaskRegistration {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if !self.registry.release(&self.task_id) {
            tracing::error!(
                task_id = %self.task_id,
                "task vanished from the registry while its registration was live"
            );
            debug_assert!(std::thread::panicking(), "registry lost a live task entry");
        }
    }
}
