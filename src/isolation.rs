//! Isolation manager - one sandbox process per execution request
//!
//! Lifecycle: Spawning -> Running -> {Completed | TimedOut} -> Terminated.
//! The reply exchange and the deadline race inside a single `select!`, so
//! exactly one of them resolves the request. Whatever wins, the whole process
//! group is SIGKILLed and reaped before the result is handed back. If the
//! request future is dropped mid-flight, the group is still killed.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::core::{
    truncate_to_limit, ExecutionRequest, ExecutionResult, ExecutionStatus, SandboxMessage,
    OUTPUT_LIMIT_BYTES,
};
use crate::dispatcher::Executor;
use crate::error::ExecError;
use crate::sandbox::Limits;

/// PATH handed to the sandbox; nothing else from the worker's environment leaks
const SANDBOX_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Longest reply line accepted: both capped streams at worst-case JSON
/// escaping (6 bytes per input byte) plus the envelope
const MAX_REPLY_BYTES: u64 = (OUTPUT_LIMIT_BYTES as u64) * 2 * 6 + 1024;

/// Program (plus arguments) started as the sandbox runtime
#[derive(Debug, Clone)]
pub struct SandboxCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl SandboxCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// The worker executable's own `sandbox` subcommand
    pub fn worker(program: impl Into<PathBuf>, php_binary: &Path, limits: &Limits) -> Self {
        Self::new(program).with_args([
            "sandbox".to_string(),
            "--php".to_string(),
            php_binary.to_string_lossy().into_owned(),
            "--memory-limit-mb".to_string(),
            limits.memory_mb.to_string(),
            "--address-space-limit-mb".to_string(),
            limits.address_space_mb.to_string(),
            "--process-limit".to_string(),
            limits.processes.to_string(),
            "--cpu-limit-secs".to_string(),
            limits.cpu_secs.to_string(),
            "--file-size-limit-kb".to_string(),
            limits.fsize_kb.to_string(),
        ])
    }
}

/// Ways a sandbox process can break the one-message reply protocol
#[derive(Debug, Error)]
enum ReplyError {
    #[error("sandbox pipes unavailable")]
    Pipes,
    #[error("failed to encode sandbox message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to deliver sandbox message: {0}")]
    Deliver(#[source] io::Error),
    #[error("failed to read sandbox reply: {0}")]
    Read(#[source] io::Error),
    /// Resolves the request at once as `runtime_error`; the deadline is not
    /// waited out for a process that can no longer reply
    #[error("sandbox exited without a reply")]
    Closed,
    #[error("sandbox reply exceeded {} bytes", MAX_REPLY_BYTES)]
    TooLarge,
    #[error("malformed sandbox reply: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("sandbox reported a timeout status itself")]
    SelfDeclaredTimeout,
}

/// Which side of the race resolved the request
enum Resolution {
    Completed(Result<ExecutionResult, ReplyError>),
    TimedOut,
}

/// SIGKILLs a sandbox process group when dropped, unless disarmed
struct GroupGuard {
    pgid: Option<Pid>,
}

impl GroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw),
        }
    }

    /// Kill the group; true if it is gone afterwards
    fn kill(&self) -> bool {
        let Some(pgid) = self.pgid else {
            return false;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => true,
            Err(e) => {
                warn!("Failed to kill sandbox process group {}: {}", pgid, e);
                false
            }
        }
    }

    /// The leader has been reaped and its pid may be reused
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if self.pgid.is_some() {
            debug!("Request dropped, killing sandbox process group {:?}", self.pgid);
            self.kill();
        }
    }
}

/// Spawns, races and terminates sandbox processes
#[derive(Debug, Clone)]
pub struct IsolationManager {
    command: SandboxCommand,
}

impl IsolationManager {
    pub fn new(command: SandboxCommand) -> Self {
        Self { command }
    }

    fn build_command(&self, workspace: &Path) -> Command {
        let mut std_cmd = std::process::Command::new(&self.command.program);
        std_cmd
            .args(&self.command.args)
            .current_dir(workspace)
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .env("HOME", workspace)
            // own group, so the interpreter dies with the runtime
            .process_group(0);
        if let Ok(filter) = std::env::var("RUST_LOG") {
            std_cmd.env("RUST_LOG", filter);
        }

        let mut cmd = Command::from(std_cmd);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }

    /// Run one request to completion. Only workspace or spawn failures
    /// surface as errors; everything after spawn becomes an `ExecutionResult`.
    pub async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        let started = Instant::now();
        let workspace = tempfile::Builder::new()
            .prefix("golf-sandbox-")
            .tempdir()
            .map_err(ExecError::Workspace)?;

        let mut child = self
            .build_command(workspace.path())
            .spawn()
            .map_err(ExecError::Spawn)?;
        let deadline = started + request.max_duration();
        let pid = child.id();
        let mut group = GroupGuard::new(pid);
        debug!(
            "Spawned sandbox pid={:?} in {:?}, deadline={}ms",
            pid,
            workspace.path(),
            request.max_duration_ms
        );

        let message = request.to_message();
        let exchange = exchange(child.stdin.take(), child.stdout.take(), &message);

        let resolution = tokio::select! {
            reply = exchange => Resolution::Completed(reply),
            _ = sleep_until(deadline) => Resolution::TimedOut,
        };

        terminate(&mut child, &group).await;
        group.disarm();
        drop(workspace);

        let result = match resolution {
            Resolution::Completed(Ok(result)) => result,
            // includes a sandbox that exited without replying
            Resolution::Completed(Err(e)) => {
                warn!("Sandbox pid={:?} broke the reply protocol: {}", pid, e);
                ExecutionResult::runtime_error("", e.to_string())
            }
            Resolution::TimedOut => ExecutionResult::timeout(request.max_duration_ms),
        };

        info!(
            "Execution finished: status={}, elapsed={}ms",
            result.status,
            started.elapsed().as_millis()
        );
        Ok(result)
    }
}

#[async_trait]
impl Executor for IsolationManager {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        self.run(&request).await
    }
}

/// Deliver the single message, then wait for the single reply line
async fn exchange(
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    message: &SandboxMessage,
) -> Result<ExecutionResult, ReplyError> {
    let (Some(mut stdin), Some(stdout)) = (stdin, stdout) else {
        return Err(ReplyError::Pipes);
    };

    let mut payload = serde_json::to_vec(message).map_err(ReplyError::Encode)?;
    payload.push(b'\n');
    stdin.write_all(&payload).await.map_err(ReplyError::Deliver)?;
    // closing stdin guarantees there is never a second message
    drop(stdin);

    let mut reader = BufReader::new(stdout.take(MAX_REPLY_BYTES));
    let mut line = Vec::new();
    let n = reader
        .read_until(b'\n', &mut line)
        .await
        .map_err(ReplyError::Read)?;
    if n == 0 {
        return Err(ReplyError::Closed);
    }
    if !line.ends_with(b"\n") && n as u64 >= MAX_REPLY_BYTES {
        return Err(ReplyError::TooLarge);
    }

    let mut result: ExecutionResult =
        serde_json::from_slice(&line).map_err(ReplyError::Malformed)?;
    if result.status == ExecutionStatus::Timeout {
        return Err(ReplyError::SelfDeclaredTimeout);
    }
    truncate_to_limit(&mut result.stdout, OUTPUT_LIMIT_BYTES);
    truncate_to_limit(&mut result.stderr, OUTPUT_LIMIT_BYTES);
    Ok(result)
}

/// SIGKILL the sandbox's process group and reap the leader. Safe to call
/// when the process already exited on its own.
async fn terminate(child: &mut Child, group: &GroupGuard) {
    if !group.kill() {
        if let Err(e) = child.start_kill() {
            debug!("Sandbox already gone: {}", e);
        }
    }

    match child.wait().await {
        Ok(status) => debug!("Sandbox group {:?} reaped: {}", group.pgid, status),
        Err(e) => warn!("Failed to reap sandbox group {:?}: {}", group.pgid, e),
    }
}
