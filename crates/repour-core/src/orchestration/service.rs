use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::adjust::ProviderRegistry;
use crate::config::RepourConfig;
use crate::execution::LogSink;
use crate::models::{AdjustRequest, AdjustTask, CoreError, CoreErrorKind, OutcomeRecord, TaskId};
use crate::orchestration::{
    CallbackDispatcher, DeliveryResult, OrchestrationResult, TaskExecutor, TaskRegistry,
};

/// Entry point for adjust requests. Owns the process-wide task registry and
/// hands each accepted request to its own tokio task.
pub struct AdjustService {
    registry: Arc<TaskRegistry>,
    providers: Arc<ProviderRegistry>,
    executor: Arc<TaskExecutor>,
    dispatcher: CallbackDispatcher,
}

#[derive(Clone, Debug)]
pub struct TaskReport {
    pub outcome: OutcomeRecord,
    /// Absent when the request carried no callback destination.
    pub delivery: Option<DeliveryResult>,
}

pub struct TaskHandle {
    task_id: TaskId,
    join: JoinHandle<TaskReport>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub async fn join(self) -> OrchestrationResult<TaskReport> {
        self.join.await.map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("adjust task worker failed: {error}"),
            )
            .for_task(&self.task_id)
        })
    }
}

impl AdjustService {
    pub fn new(
        providers: ProviderRegistry,
        executor: TaskExecutor,
        dispatcher: CallbackDispatcher,
    ) -> Self {
        Self {
            registry: Arc::new(TaskRegistry::new()),
            providers: Arc::new(providers),
            executor: Arc::new(executor),
            dispatcher,
        }
    }

    pub fn from_config(
        config: &RepourConfig,
        log_sink: Arc<dyn LogSink>,
    ) -> OrchestrationResult<Self> {
        config.validate()?;

        let providers = ProviderRegistry::from_config(&config.adjust)?;
        tracing::info!(
            strategies = ?providers.names().collect::<Vec<_>>(),
            "adjust providers registered"
        );

        Ok(Self::new(
            providers,
            TaskExecutor::from_config(&config.execution, log_sink),
            CallbackDispatcher::from_config(&config.callback),
        ))
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Registers the request and starts it in the background. Fails without
    /// side effects on an unknown strategy, an id that is already live, or a
    /// working directory another live task holds.
    pub fn submit(&self, request: AdjustRequest) -> OrchestrationResult<TaskHandle> {
        let task = AdjustTask::from_request(&request);
        let Some(provider) = self.providers.get(&task.strategy) else {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("unknown adjust strategy '{}'", task.strategy),
            )
            .for_task(&task.id)
            .for_strategy(&task.strategy));
        };

        let registration = self
            .registry
            .register_guarded(&task.id, &task.working_dir)?;
        tracing::info!(
            task_id = %task.id,
            strategy = %task.strategy,
            work_dir = %task.working_dir.display(),
            callback = request.callback_destination.is_some(),
            "accepted adjust request"
        );

        let registry = Arc::clone(&self.registry);
        let executor = Arc::clone(&self.executor);
        let dispatcher = self.dispatcher.clone();
        let destination = request.callback_destination;
        let task_id = task.id.clone();

        let join = tokio::spawn(async move {
            registry.mark_running(&task.id);
            let outcome = executor
                .execute(&task, provider, registration.token())
                .await;
            registration.release();

            let delivery = match &destination {
                Some(destination) => Some(dispatcher.deliver(destination, &outcome).await),
                None => None,
            };

            TaskReport { outcome, delivery }
        });

        Ok(TaskHandle { task_id, join })
    }

    /// Submits and waits for the terminal report.
    pub async fn run(&self, request: AdjustRequest) -> OrchestrationResult<TaskReport> {
        self.submit(request)?.join().await
    }

    pub fn cancel(&self, task_id: &TaskId) -> bool {
        self.registry.cancel(task_id)
    }

    /// Cancels every live task and waits for the registry to drain. Returns
    /// `false` if tasks were still registered when `timeout` elapsed.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let signalled = self.registry.cancel_all();
        tracing::info!(
            signalled,
            live = self.registry.len(),
            "shutting down adjust service"
        );

        let drained = self.registry.wait_idle(timeout).await;
        if !drained {
            tracing::error!(
                live = self.registry.len(),
                "adjust tasks still registered after shutdown timeout"
            );
        }
        drained
    }
}
