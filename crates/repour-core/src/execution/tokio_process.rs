use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::execution::log_sink::normalize_line;
use crate::execution::{
    ExecutionResult, LogLine, LogSink, LogStream, LogTail, ProcessExecutor, ProcessExitStatus,
    ProcessOutput, ProcessSpawnRequest, ProcessTerminationMode, ProcessWaitFuture,
    RunningProcess, TaskCancellationToken,
};
use crate::models::{CoreError, CoreErrorKind, TaskId};

const OUTPUT_DRAIN_WINDOW: Duration = Duration::from_millis(500);
const KILL_REAP_WINDOW: Duration = Duration::from_secs(2);

pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let mut cmd = tokio::process::Command::new(&request.command.program);
        cmd.args(&request.command.args);

        for (key, value) in &request.command.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &request.command.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|error| {
            CoreError::new(
                CoreErrorKind::Launch,
                format!(
                    "failed to launch '{}': {error}",
                    request.command.program.display()
                ),
            )
            .for_task(&request.task_id)
        })?;

        let pid = child.id();
        tracing::debug!(
            task_id = %request.task_id,
            pid = ?pid,
            command = %request.command.display(),
            "spawned tool process"
        );

        Ok(Box::new(TokioRunningProcess {
            child: Mutex::new(Some(child)),
            pid,
            started_at: SystemTime::now(),
            task_id: request.task_id,
            grace_period: request.grace_period,
            cancellation: request.cancellation,
            log_sink: request.log_sink,
            log_tail_lines: request.log_tail_lines,
        }))
    }
}

struct TokioRunningProcess {
    child: Mutex<Option<tokio::process::Child>>,
    pid: Option<u32>,
    started_at: SystemTime,
    task_id: TaskId,
    grace_period: Duration,
    cancellation: TaskCancellationToken,
    log_sink: Arc<dyn LogSink>,
    log_tail_lines: usize,
}

impl RunningProcess for TokioRunningProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&self, mode: ProcessTerminationMode) -> ExecutionResult<()> {
        if let Some(pid) = self.pid {
            return signal_group(pid, mode).map_err(|error| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    format!("failed to signal process group {pid}: {error}"),
                )
                .for_task(&self.task_id)
            });
        }

        let mut guard = self.child.lock().map_err(|_| {
            CoreError::new(CoreErrorKind::Internal, "child process mutex poisoned")
                .for_task(&self.task_id)
        })?;
        if let Some(child) = guard.as_mut() {
            let _ = child.start_kill();
        }
        Ok(())
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let TokioRunningProcess {
            child,
            pid,
            started_at,
            task_id,
            grace_period,
            cancellation,
            log_sink,
            log_tail_lines,
        } = *self;
        let child = child.into_inner().ok().flatten();

        Box::pin(async move {
            let mut child = child.ok_or_else(|| {
                CoreError::new(CoreErrorKind::Internal, "child process already consumed")
                    .for_task(&task_id)
            })?;
            let mut group_guard = GroupKillGuard { pid, armed: true };

            let (line_tx, line_rx) = mpsc::unbounded_channel();
            let mut readers = Vec::with_capacity(2);
            if let Some(stdout) = child.stdout.take() {
                readers.push(spawn_line_reader(stdout, LogStream::Stdout, line_tx.clone()));
            }
            if let Some(stderr) = child.stderr.take() {
                readers.push(spawn_line_reader(stderr, LogStream::Stderr, line_tx.clone()));
            }
            drop(line_tx);
            let collector = spawn_collector(task_id.clone(), line_rx, log_sink, log_tail_lines);

            let wait_err = |error: std::io::Error| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    format!("failed to wait for process: {error}"),
                )
                .for_task(&task_id)
            };

            let status = tokio::select! {
                result = child.wait() => {
                    let status = result.map_err(wait_err)?;
                    match status.code() {
                        Some(code) => ProcessExitStatus::ExitCode(code),
                        None => ProcessExitStatus::Terminated,
                    }
                }
                _ = cancellation.cancelled() => {
                    tracing::info!(
                        task_id = %task_id,
                        pid = ?pid,
                        grace_ms = grace_period.as_millis() as u64,
                        "cancellation requested; terminating tool process"
                    );
                    if let Some(pid) = pid
                        && let Err(error) = signal_group(pid, ProcessTerminationMode::Graceful { grace_period })
                    {
                        tracing::warn!(task_id = %task_id, pid, error = %error, "graceful termination signal failed");
                    }

                    if tokio::time::timeout(grace_period, child.wait()).await.is_err() {
                        tracing::warn!(
                            task_id = %task_id,
                            pid = ?pid,
                            "tool process ignored termination signal; killing"
                        );
                        if let Some(pid) = pid {
                            let _ = signal_group(pid, ProcessTerminationMode::Immediate);
                        }
                        let _ = child.start_kill();
                        let _ = tokio::time::timeout(KILL_REAP_WINDOW, child.wait()).await;
                    }
                    // Sweep descendants while the group id still belongs to this task.
                    if let Some(pid) = pid {
                        let _ = signal_group(pid, ProcessTerminationMode::Immediate);
                    }
                    ProcessExitStatus::Cancelled
                }
            };
            group_guard.armed = false;

            // Descendants may keep the pipes open after the child exits, so the
            // readers only get a short window before they are abandoned.
            let drain_deadline = tokio::time::Instant::now() + OUTPUT_DRAIN_WINDOW;
            for mut reader in readers {
                if tokio::time::timeout_at(drain_deadline, &mut reader)
                    .await
                    .is_err()
                {
                    reader.abort();
                }
            }
            let tail = collector.await.unwrap_or_default();
            let finished_at = SystemTime::now();

            tracing::debug!(
                task_id = %task_id,
                pid = ?pid,
                status = ?status,
                lines = tail.total(),
                elapsed_ms = finished_at.duration_since(started_at).unwrap_or_default().as_millis() as u64,
                "tool process settled"
            );

            Ok(ProcessOutput {
                status,
                line_count: tail.total(),
                log_tail: tail.into_lines(),
                started_at,
                finished_at,
            })
        })
    }
}

/// Kills the whole process group if the wait future is dropped or fails
/// before the child settled.
struct GroupKillGuard {
    pid: Option<u32>,
    armed: bool,
}

impl Drop for GroupKillGuard {
    fn drop(&mut self) {
        if self.armed
            && let Some(pid) = self.pid
        {
            let _ = signal_group(pid, ProcessTerminationMode::Immediate);
        }
    }
}

fn spawn_line_reader<R>(
    stream: R,
    kind: LogStream,
    sender: mpsc::UnboundedSender<(LogStream, String)>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if sender.send((kind, normalize_line(&buffer))).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

fn spawn_collector(
    task_id: TaskId,
    mut receiver: mpsc::UnboundedReceiver<(LogStream, String)>,
    sink: Arc<dyn LogSink>,
    tail_lines: usize,
) -> JoinHandle<LogTail> {
    tokio::spawn(async move {
        let mut tail = LogTail::new(tail_lines);
        let mut sequence = 0u64;
        while let Some((stream, text)) = receiver.recv().await {
            let line = LogLine {
                task_id: task_id.clone(),
                stream,
                sequence,
                text,
            };
            sink.line(&line);
            tail.push(line.text);
            sequence = sequence.saturating_add(1);
        }
        tail
    })
}

#[cfg(unix)]
fn signal_group(pid: u32, mode: ProcessTerminationMode) -> std::io::Result<()> {
    let signal = match mode {
        ProcessTerminationMode::Immediate => libc::SIGKILL,
        ProcessTerminationMode::Graceful { .. } => libc::SIGTERM,
    };

    let pgid = -(pid as libc::pid_t);
    let result = unsafe { libc::kill(pgid, signal) };

    if result != 0 {
        let os_error = std::io::Error::last_os_error();
        if os_error.raw_os_error() != Some(libc::ESRCH) {
            return Err(os_error);
        }
    }

    Ok(())
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _mode: ProcessTerminationMode) -> std::io::Result<()> {
    // No process groups here; the wait loop falls back to `Child::start_kill`.
    Ok(())
}
