use std::sync::Arc;
use std::time::Duration;

use crate::adjust::{AdjustPlan, AdjustProvider};
use crate::config::ExecutionConfig;
use crate::execution::{
    CommandSpec, DEFAULT_GRACE_PERIOD, DEFAULT_LOG_TAIL_LINES, LogSink, NullLogSink,
    ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    TaskCancellationToken, TokioProcessExecutor, run_process,
};
use crate::models::{AdjustTask, CoreError, CoreErrorKind, OutcomeRecord, TerminalState};
use crate::orchestration::OrchestrationResult;

const FAILURE_TAIL_LINES: usize = 20;

/// Runs one adjust task through its provider and folds every exit path into
/// a single [`OutcomeRecord`].
pub struct TaskExecutor {
    process_executor: Arc<dyn ProcessExecutor>,
    grace_period: Duration,
    log_tail_lines: usize,
    log_sink: Arc<dyn LogSink>,
}

impl TaskExecutor {
    pub fn new(process_executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            process_executor,
            grace_period: DEFAULT_GRACE_PERIOD,
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            log_sink: Arc::new(NullLogSink),
        }
    }

    pub fn from_config(config: &ExecutionConfig, log_sink: Arc<dyn LogSink>) -> Self {
        Self::new(Arc::new(TokioProcessExecutor))
            .grace_period(config.grace_period())
            .log_tail_lines(config.log_tail_lines)
            .log_sink(log_sink)
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn log_tail_lines(mut self, lines: usize) -> Self {
        self.log_tail_lines = lines;
        self
    }

    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }

    pub async fn execute(
        &self,
        task: &AdjustTask,
        provider: Arc<dyn AdjustProvider>,
        token: &TaskCancellationToken,
    ) -> OutcomeRecord {
        let outcome = match self.attempt(task, &provider, token).await {
            Ok(outcome) => outcome,
            Err(error) => OutcomeRecord::failed(task.id.clone(), error, Vec::new()),
        };
        let outcome = outcome
            .with_adjust_type(Some(provider.adjust_type().to_string()))
            .with_error_context(&task.id, &task.strategy);

        match outcome.state() {
            TerminalState::Succeeded => tracing::info!(
                task_id = %task.id,
                strategy = %task.strategy,
                "adjust task succeeded"
            ),
            TerminalState::Cancelled => tracing::info!(
                task_id = %task.id,
                strategy = %task.strategy,
                "adjust task cancelled"
            ),
            TerminalState::Failed => tracing::warn!(
                task_id = %task.id,
                strategy = %task.strategy,
                error_kind = outcome.error().map(|error| error.kind.as_str()).unwrap_or_default(),
                error = outcome.error().map(|error| error.message.as_str()).unwrap_or_default(),
                "adjust task failed"
            ),
        }

        outcome
    }

    async fn attempt(
        &self,
        task: &AdjustTask,
        provider: &Arc<dyn AdjustProvider>,
        token: &TaskCancellationToken,
    ) -> OrchestrationResult<OutcomeRecord> {
        if !task.working_dir.is_dir() {
            return Err(CoreError::new(
                CoreErrorKind::Precondition,
                format!(
                    "working directory '{}' does not exist",
                    task.working_dir.display()
                ),
            ));
        }

        if token.is_cancelled() {
            return Ok(OutcomeRecord::cancelled(task.id.clone(), Vec::new()));
        }

        let workspace = {
            let provider = Arc::clone(provider);
            let task = task.clone();
            blocking(move || provider.prepare(&task)).await?
        };
        let plan = provider.build_command(task, &workspace)?;

        let outcome = self.run_plan(task, provider, &plan, token).await;

        let cleanup_provider = Arc::clone(provider);
        let cleanup_plan = plan.clone();
        if let Err(error) = tokio::task::spawn_blocking(move || {
            cleanup_provider.cleanup(&cleanup_plan);
        })
        .await
        {
            tracing::warn!(task_id = %task.id, error = %error, "adjust cleanup did not complete");
        }

        Ok(outcome)
    }

    async fn run_plan(
        &self,
        task: &AdjustTask,
        provider: &Arc<dyn AdjustProvider>,
        plan: &AdjustPlan,
        token: &TaskCancellationToken,
    ) -> OutcomeRecord {
        for step in &plan.preflight {
            if token.is_cancelled() {
                return OutcomeRecord::cancelled(task.id.clone(), Vec::new());
            }
            let output = match self.run_step(task, &step.command, token).await {
                Ok(output) => output,
                Err(error) => return OutcomeRecord::failed(task.id.clone(), error, Vec::new()),
            };
            match output.status {
                ProcessExitStatus::ExitCode(0) => {}
                ProcessExitStatus::Cancelled => {
                    return OutcomeRecord::cancelled(task.id.clone(), output.log_tail);
                }
                _ => return tool_failure(task, Some(step.description.as_str()), output),
            }
        }

        // A cancel between steps must not launch the next tool.
        if token.is_cancelled() {
            return OutcomeRecord::cancelled(task.id.clone(), Vec::new());
        }
        let output = match self.run_step(task, &plan.command, token).await {
            Ok(output) => output,
            Err(error) => return OutcomeRecord::failed(task.id.clone(), error, Vec::new()),
        };

        match output.status {
            ProcessExitStatus::Cancelled => {
                OutcomeRecord::cancelled(task.id.clone(), output.log_tail)
            }
            // A cancel that lost the race against a clean exit still wins.
            ProcessExitStatus::ExitCode(0) if token.is_cancelled() => {
                OutcomeRecord::cancelled(task.id.clone(), output.log_tail)
            }
            ProcessExitStatus::ExitCode(0) => {
                let extractor = Arc::clone(provider);
                let extract_plan = plan.clone();
                match blocking(move || extractor.extract_result(&extract_plan)).await {
                    Ok(result) => OutcomeRecord::succeeded(
                        task.id.clone(),
                        plan.adjust_type.clone(),
                        result,
                        output.log_tail,
                    ),
                    Err(error) => OutcomeRecord::failed(task.id.clone(), error, output.log_tail),
                }
            }
            _ => tool_failure(task, None, output),
        }
    }

    async fn run_step(
        &self,
        task: &AdjustTask,
        command: &CommandSpec,
        token: &TaskCancellationToken,
    ) -> OrchestrationResult<ProcessOutput> {
        tracing::info!(
            task_id = %task.id,
            strategy = %task.strategy,
            command = %command.display(),
            "launching adjust command"
        );

        let request = ProcessSpawnRequest::new(task.id.clone(), command.clone())
            .grace_period(self.grace_period)
            .cancellation(token.clone())
            .log_sink(Arc::clone(&self.log_sink))
            .log_tail_lines(self.log_tail_lines);
        let output = run_process(self.process_executor.as_ref(), request).await?;

        tracing::debug!(
            task_id = %task.id,
            status = ?output.status,
            lines = output.line_count,
            elapsed_ms = output.elapsed().as_millis() as u64,
            "adjust command settled"
        );
        Ok(output)
    }
}

fn tool_failure(task: &AdjustTask, step: Option<&str>, output: ProcessOutput) -> OutcomeRecord {
    let mut message = match output.status {
        ProcessExitStatus::ExitCode(code) => format!("process exited with code {code}"),
        _ => "process was terminated by a signal".to_string(),
    };
    if let Some(step) = step {
        message = format!("{step}: {message}");
    }

    let shown = output.log_tail.len().saturating_sub(FAILURE_TAIL_LINES);
    for line in &output.log_tail[shown..] {
        message.push('\n');
        message.push_str(line);
    }

    OutcomeRecord::failed(
        task.id.clone(),
        CoreError::new(CoreErrorKind::ToolFailure, message),
        output.log_tail,
    )
}

async fn blocking<T, F>(work: F) -> OrchestrationResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> OrchestrationResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|error| {
        CoreError::new(
            CoreErrorKind::Internal,
            format!("adjust worker join failure: {error}"),
        )
    })?
}
