pub mod cancellation;
pub mod log_sink;
pub mod tokio_process;

pub use cancellation::TaskCancellationToken;
pub use log_sink::{
    BroadcastLogSink, LogLine, LogSink, LogStream, LogTail, MultiLogSink, NullLogSink,
    TracingLogSink,
};
pub use tokio_process::TokioProcessExecutor;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::models::{CoreError, CoreErrorKind, TaskId};

pub type ExecutionResult<T> = Result<T, CoreError>;

pub type ProcessWaitFuture = Pin<Box<dyn Future<Output = ExecutionResult<ProcessOutput>> + Send>>;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_LOG_TAIL_LINES: usize = 200;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    /// Human-readable command line for logs and diagnostics.
    pub fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }

    pub fn validate(&self, task_id: &TaskId) -> ExecutionResult<()> {
        if self.program.as_os_str().is_empty() {
            return Err(invalid_input(task_id, "command program path must not be empty"));
        }

        if self
            .args
            .iter()
            .any(|arg| arg.is_empty() || arg.contains('\0'))
        {
            return Err(invalid_input(
                task_id,
                "command args must be non-empty and must not contain NUL bytes",
            ));
        }

        if self
            .env
            .iter()
            .any(|(key, value)| key.is_empty() || key.contains('\0') || value.contains('\0'))
        {
            return Err(invalid_input(
                task_id,
                "environment keys and values must be non-empty and must not contain NUL bytes",
            ));
        }

        if let Some(dir) = &self.working_dir
            && !dir.is_dir()
        {
            return Err(CoreError::new(
                CoreErrorKind::Precondition,
                format!("working directory '{}' does not exist", dir.display()),
            )
            .for_task(task_id));
        }

        Ok(())
    }
}

#[derive(Clone)]
pub struct ProcessSpawnRequest {
    pub task_id: TaskId,
    pub command: CommandSpec,
    pub grace_period: Duration,
    pub cancellation: TaskCancellationToken,
    pub log_sink: Arc<dyn LogSink>,
    pub log_tail_lines: usize,
    pub requested_at: SystemTime,
}

impl ProcessSpawnRequest {
    pub fn new(task_id: TaskId, command: CommandSpec) -> Self {
        Self {
            task_id,
            command,
            grace_period: DEFAULT_GRACE_PERIOD,
            cancellation: TaskCancellationToken::new(),
            log_sink: Arc::new(NullLogSink),
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            requested_at: SystemTime::now(),
        }
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn cancellation(mut self, token: TaskCancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn log_tail_lines(mut self, lines: usize) -> Self {
        self.log_tail_lines = lines;
        self
    }

    pub fn validate(&self) -> ExecutionResult<()> {
        self.command.validate(&self.task_id)?;

        if self.grace_period.is_zero() {
            return Err(invalid_input(
                &self.task_id,
                "grace period must be greater than zero",
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessTerminationMode {
    Graceful { grace_period: Duration },
    Immediate,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessExitStatus {
    ExitCode(i32),
    /// Killed by a signal nobody in this process asked for.
    Terminated,
    /// Stopped because the task's cancellation token fired.
    Cancelled,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessOutput {
    pub status: ProcessExitStatus,
    pub log_tail: Vec<String>,
    pub line_count: u64,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
}

impl ProcessOutput {
    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }
}

pub trait RunningProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    fn terminate(&self, mode: ProcessTerminationMode) -> ExecutionResult<()>;

    /// Settles once the child has exited or, after the request's cancellation
    /// token fired, once it has been terminated. The child never outlives
    /// the returned future, including when the future is dropped early.
    fn wait(self: Box<Self>) -> ProcessWaitFuture;
}

pub trait ProcessExecutor: Send + Sync {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>>;
}

pub fn spawn_validated(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutionResult<Box<dyn RunningProcess>> {
    request.validate()?;
    executor.spawn(request)
}

/// Spawns and waits in one step.
pub async fn run_process(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutionResult<ProcessOutput> {
    let process = spawn_validated(executor, request)?;
    process.wait().await
}

fn invalid_input(task_id: &TaskId, message: &str) -> CoreError {
    CoreError::new(CoreErrorKind::InvalidInput, message).for_task(task_id)
}
