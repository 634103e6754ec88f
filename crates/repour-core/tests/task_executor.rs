#![cfg(unix)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use repour_core::adjust::{
    AdjustPlan, AdjustProvider, AdjustResult, PlannedCommand, PreparedWorkspace,
};
use repour_core::execution::{
    CommandSpec, ExecutionResult, LogLine, LogSink, ProcessExecutor, ProcessSpawnRequest,
    ProcessTerminationMode, ProcessWaitFuture, RunningProcess, TaskCancellationToken,
    TokioProcessExecutor,
};
use repour_core::models::{
    AdjustResultData, AdjustTask, CoreError, CoreErrorKind, TaskId, TerminalState,
};
use repour_core::orchestration::TaskExecutor;

#[derive(Default)]
struct Calls {
    prepare: AtomicUsize,
    extract: AtomicUsize,
    cleanup: AtomicUsize,
}

struct ScriptProvider {
    script: String,
    preflight: Option<String>,
    prepare_error: Option<CoreError>,
    calls: Arc<Calls>,
}

impl ScriptProvider {
    fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
            preflight: None,
            prepare_error: None,
            calls: Arc::new(Calls::default()),
        }
    }
}

impl AdjustProvider for ScriptProvider {
    fn name(&self) -> &str {
        "toolX"
    }

    fn adjust_type(&self) -> &str {
        "TOOLX"
    }

    fn prepare(&self, task: &AdjustTask) -> AdjustResult<PreparedWorkspace> {
        self.calls.prepare.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.prepare_error {
            return Err(error.clone());
        }
        Ok(PreparedWorkspace {
            work_dir: task.working_dir.clone(),
            extra_parameters: Vec::new(),
        })
    }

    fn build_command(
        &self,
        _task: &AdjustTask,
        workspace: &PreparedWorkspace,
    ) -> AdjustResult<AdjustPlan> {
        let shell = |script: &str| {
            CommandSpec::new("/bin/sh")
                .arg("-c")
                .arg(script)
                .working_dir(&workspace.work_dir)
        };

        Ok(AdjustPlan {
            adjust_type: "TOOLX".to_string(),
            work_dir: workspace.work_dir.clone(),
            preflight: self
                .preflight
                .iter()
                .map(|script| PlannedCommand {
                    description: "Failed getting toolX version".to_string(),
                    command: shell(script),
                })
                .collect(),
            command: shell(&self.script),
            results_file: None,
        })
    }

    fn extract_result(&self, plan: &AdjustPlan) -> AdjustResult<AdjustResultData> {
        self.calls.extract.fetch_add(1, Ordering::SeqCst);
        let path = plan.work_dir.join("result.json");
        let text = std::fs::read_to_string(&path).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ResultArtifact,
                format!("'{}' is missing: {error}", path.display()),
            )
        })?;
        let value: serde_json::Value = serde_json::from_str(&text).map_err(|error| {
            CoreError::new(CoreErrorKind::ResultArtifact, error.to_string())
        })?;
        let field = |name: &str| value.get(name).and_then(|v| v.as_str()).map(str::to_string);

        Ok(AdjustResultData {
            group_id: field("group"),
            artifact_id: field("name"),
            version: field("version"),
            removed_repositories: Vec::new(),
        })
    }

    fn cleanup(&self, _plan: &AdjustPlan) {
        self.calls.cleanup.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CountingExecutor {
    spawns: AtomicUsize,
}

impl ProcessExecutor for CountingExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        TokioProcessExecutor.spawn(request)
    }
}

/// Cancels the task token as soon as the first process it spawned has exited.
struct CancelAfterFirstExit {
    token: TaskCancellationToken,
    spawns: AtomicUsize,
}

struct CancelOnExit {
    inner: Box<dyn RunningProcess>,
    token: TaskCancellationToken,
}

impl RunningProcess for CancelOnExit {
    fn pid(&self) -> Option<u32> {
        self.inner.pid()
    }

    fn terminate(&self, mode: ProcessTerminationMode) -> ExecutionResult<()> {
        self.inner.terminate(mode)
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let CancelOnExit { inner, token } = *self;
        Box::pin(async move {
            let output = inner.wait().await;
            token.cancel();
            output
        })
    }
}

impl ProcessExecutor for CancelAfterFirstExit {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let previous = self.spawns.fetch_add(1, Ordering::SeqCst);
        let process = TokioProcessExecutor.spawn(request)?;
        if previous > 0 {
            return Ok(process);
        }
        Ok(Box::new(CancelOnExit {
            inner: process,
            token: self.token.clone(),
        }))
    }
}

#[derive(Default)]
struct CollectingSink {
    lines: Mutex<Vec<LogLine>>,
}

impl LogSink for CollectingSink {
    fn line(&self, line: &LogLine) {
        self.lines.lock().unwrap().push(line.clone());
    }
}

fn executor() -> (TaskExecutor, Arc<CountingExecutor>) {
    let processes = Arc::new(CountingExecutor::default());
    let executor = TaskExecutor::new(processes.clone()).grace_period(Duration::from_secs(1));
    (executor, processes)
}

fn task(id: &str, dir: &Path) -> AdjustTask {
    AdjustTask::new(TaskId::new(id), "toolX", dir)
}

#[tokio::test]
async fn zero_exit_with_result_artifact_succeeds() {
    let checkout = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptProvider::new(
        r#"echo aligning; printf '{"group":"g","name":"n","version":"1.0"}' > result.json"#,
    ));
    let calls = provider.calls.clone();
    let (executor, _) = executor();

    let outcome = executor
        .execute(
            &task("T1", checkout.path()),
            provider,
            &TaskCancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.state(), TerminalState::Succeeded);
    assert_eq!(outcome.log_tail(), &["aligning".to_string()]);
    assert_eq!(calls.cleanup.load(Ordering::SeqCst), 1);

    let payload = serde_json::to_value(outcome.to_payload()).unwrap();
    assert_eq!(
        payload,
        serde_json::json!({
            "taskId": "T1",
            "status": "SUCCESS",
            "adjustType": "TOOLX",
            "resultData": {
                "groupId": "g",
                "artifactId": "n",
                "version": "1.0",
                "removedRepositories": []
            }
        })
    );
}

#[tokio::test]
async fn nonzero_exit_fails_without_running_the_extractor() {
    let checkout = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptProvider::new("echo compilation failed >&2; exit 1"));
    let calls = provider.calls.clone();
    let (executor, _) = executor();

    let outcome = executor
        .execute(
            &task("T2", checkout.path()),
            provider,
            &TaskCancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.state(), TerminalState::Failed);
    let error = outcome.error().unwrap();
    assert_eq!(error.kind, CoreErrorKind::ToolFailure);
    assert!(error.message.contains("process exited with code 1"));
    assert!(error.message.contains("compilation failed"));
    assert_eq!(error.task_id, Some(TaskId::new("T2")));
    assert_eq!(error.strategy.as_deref(), Some("toolX"));
    assert_eq!(calls.extract.load(Ordering::SeqCst), 0);
    assert_eq!(calls.cleanup.load(Ordering::SeqCst), 1);

    let payload = outcome.to_payload();
    assert!(payload.result_data.is_none());
    assert!(!payload.error_detail.unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_during_run_yields_cancelled_within_grace_period() {
    let checkout = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptProvider::new("sleep 30"));
    let calls = provider.calls.clone();
    let (executor, _) = executor();
    let token = TaskCancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let outcome = executor
        .execute(&task("T3", checkout.path()), provider, &token)
        .await;

    assert_eq!(outcome.state(), TerminalState::Cancelled);
    assert!(outcome.error().is_none());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(calls.extract.load(Ordering::SeqCst), 0);
    assert_eq!(calls.cleanup.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_working_directory_fails_before_any_spawn() {
    let provider = Arc::new(ScriptProvider::new("exit 0"));
    let calls = provider.calls.clone();
    let (executor, processes) = executor();

    let outcome = executor
        .execute(
            &task("T4", Path::new("/nonexistent/checkout")),
            provider,
            &TaskCancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.state(), TerminalState::Failed);
    assert_eq!(outcome.error().unwrap().kind, CoreErrorKind::Precondition);
    assert_eq!(processes.spawns.load(Ordering::SeqCst), 0);
    assert_eq!(calls.prepare.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn provider_precondition_failure_never_launches() {
    let checkout = tempfile::tempdir().unwrap();
    let mut provider = ScriptProvider::new("exit 0");
    provider.prepare_error = Some(CoreError::new(
        CoreErrorKind::Precondition,
        "init script '/opt/init.gradle' does not exist",
    ));
    let (executor, processes) = executor();

    let outcome = executor
        .execute(
            &task("T5", checkout.path()),
            Arc::new(provider),
            &TaskCancellationToken::new(),
        )
        .await;

    let error = outcome.error().unwrap();
    assert_eq!(error.kind, CoreErrorKind::Precondition);
    assert!(error.message.contains("/opt/init.gradle"));
    assert_eq!(outcome.adjust_type(), Some("TOOLX"));
    assert_eq!(processes.spawns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_exit_without_artifact_is_a_result_artifact_failure() {
    let checkout = tempfile::tempdir().unwrap();
    let (executor, _) = executor();

    let outcome = executor
        .execute(
            &task("T6", checkout.path()),
            Arc::new(ScriptProvider::new("echo done")),
            &TaskCancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.state(), TerminalState::Failed);
    assert_eq!(outcome.error().unwrap().kind, CoreErrorKind::ResultArtifact);
    assert_eq!(outcome.log_tail(), &["done".to_string()]);
}

#[tokio::test]
async fn failing_preflight_stops_before_the_main_command() {
    let checkout = tempfile::tempdir().unwrap();
    let mut provider = ScriptProvider::new("touch ran-main");
    provider.preflight = Some("exit 2".to_string());
    let (executor, processes) = executor();

    let outcome = executor
        .execute(
            &task("T7", checkout.path()),
            Arc::new(provider),
            &TaskCancellationToken::new(),
        )
        .await;

    let error = outcome.error().unwrap();
    assert_eq!(error.kind, CoreErrorKind::ToolFailure);
    assert!(error.message.starts_with("Failed getting toolX version"));
    assert_eq!(processes.spawns.load(Ordering::SeqCst), 1);
    assert!(!checkout.path().join("ran-main").exists());
}

#[tokio::test]
async fn cancel_after_preflight_never_launches_the_main_command() {
    let checkout = tempfile::tempdir().unwrap();
    let mut provider = ScriptProvider::new("touch ran-main");
    provider.preflight = Some("exit 0".to_string());
    let calls = provider.calls.clone();

    let token = TaskCancellationToken::new();
    let processes = Arc::new(CancelAfterFirstExit {
        token: token.clone(),
        spawns: AtomicUsize::new(0),
    });
    let executor = TaskExecutor::new(processes.clone()).grace_period(Duration::from_secs(1));

    let outcome = executor
        .execute(&task("T7b", checkout.path()), Arc::new(provider), &token)
        .await;

    assert_eq!(outcome.state(), TerminalState::Cancelled);
    assert_eq!(processes.spawns.load(Ordering::SeqCst), 1);
    assert!(!checkout.path().join("ran-main").exists());
    assert_eq!(calls.extract.load(Ordering::SeqCst), 0);
    assert_eq!(calls.cleanup.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn token_cancelled_before_start_never_launches() {
    let checkout = tempfile::tempdir().unwrap();
    let (executor, processes) = executor();
    let token = TaskCancellationToken::new();
    token.cancel();

    let outcome = executor
        .execute(
            &task("T8", checkout.path()),
            Arc::new(ScriptProvider::new("exit 0")),
            &token,
        )
        .await;

    assert_eq!(outcome.state(), TerminalState::Cancelled);
    assert_eq!(processes.spawns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn streams_tool_output_to_the_configured_sink() {
    let checkout = tempfile::tempdir().unwrap();
    let sink = Arc::new(CollectingSink::default());
    let (executor, _) = executor();
    let executor = executor.log_sink(sink.clone());

    executor
        .execute(
            &task("T9", checkout.path()),
            Arc::new(ScriptProvider::new("echo one; echo two; exit 1")),
            &TaskCancellationToken::new(),
        )
        .await;

    let lines = sink.lines.lock().unwrap();
    let texts: Vec<&str> = lines.iter().map(|line| line.text.as_str()).collect();
    assert_eq!(texts, vec!["one", "two"]);
    assert!(lines.iter().all(|line| line.task_id == TaskId::new("T9")));
}

#[tokio::test]
async fn keeps_only_the_configured_log_tail() {
    let checkout = tempfile::tempdir().unwrap();
    let (executor, _) = executor();
    let executor = executor.log_tail_lines(3);

    let outcome = executor
        .execute(
            &task("T10", checkout.path()),
            Arc::new(ScriptProvider::new("for i in 1 2 3 4 5 6; do echo $i; done; exit 4")),
            &TaskCancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.log_tail(), &["4", "5", "6"].map(String::from));
}
