//! Embedded interpreter boundary
//!
//! The interpreter is a black box with a byte-callback I/O boundary and a
//! single entrypoint that either returns a completion code or faults.
//! `PhpInterpreter` drives the PHP CLI binary behind that boundary.

use std::io::{self, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use thiserror::Error;
use tracing::{debug, warn};

use super::limits::Limits;

/// Callback surface the interpreter uses for all of its I/O
pub trait InterpreterIo {
    /// Next stdin byte, or `None` once input is exhausted
    fn read(&mut self) -> Option<u8>;
    /// Stdout byte code; `None` is a flush request
    fn write_out(&mut self, code: Option<i32>);
    /// Stderr byte code; `None` is a flush request
    fn write_err(&mut self, code: Option<i32>);
}

/// Host-level failure of the interpreter itself (not of the submission)
#[derive(Debug, Error)]
pub enum InterpreterFault {
    #[error("Failed to start interpreter: {0}")]
    Launch(#[source] io::Error),
    #[error("Interpreter I/O failed: {0}")]
    Io(#[source] io::Error),
    #[error("Interpreter terminated by signal {0}")]
    Signaled(i32),
    #[error("Interpreter crashed: {0}")]
    Crashed(String),
}

/// One-shot interpreter entrypoint
pub trait Interpreter {
    fn run(&mut self, source: &str, io: &mut dyn InterpreterIo) -> Result<i32, InterpreterFault>;
}

/// Size of each chunk pulled from the interpreter's output pipes
const PIPE_CHUNK_BYTES: usize = 4096;

/// Chunks in flight between the pipe readers and the I/O callbacks
const PIPE_QUEUE_DEPTH: usize = 16;

#[derive(Clone, Copy)]
enum Stream {
    Out,
    Err,
}

/// Functions a submission never gets: process control, shell access,
/// networking and anything that changes the interpreter's own environment
const DISABLED_FUNCTIONS: &[&str] = &[
    "exec",
    "system",
    "shell_exec",
    "passthru",
    "proc_open",
    "popen",
    "proc_nice",
    "pcntl_exec",
    "pcntl_fork",
    "pcntl_signal",
    "pcntl_alarm",
    "posix_kill",
    "posix_setsid",
    "posix_setpgid",
    "posix_setuid",
    "posix_setgid",
    "putenv",
    "dl",
    "mail",
    "link",
    "symlink",
    "fsockopen",
    "pfsockopen",
    "stream_socket_client",
    "stream_socket_server",
    "socket_create",
    "curl_init",
    "curl_exec",
];

/// Runs source as a script file inside the workspace, piping bytes through
/// `InterpreterIo`
#[derive(Debug, Clone)]
pub struct PhpInterpreter {
    binary: PathBuf,
    workspace: PathBuf,
    memory_mb: u64,
}

impl PhpInterpreter {
    pub fn new(binary: impl Into<PathBuf>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            workspace: workspace.into(),
            memory_mb: Limits::default().memory_mb,
        }
    }

    pub fn with_memory_limit_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    /// `-d` settings; no php.ini is read
    fn settings(&self) -> Vec<String> {
        let workspace = self.workspace.to_string_lossy();
        // trailing slash confines open_basedir to the directory itself
        let root = format!("{}/", workspace.trim_end_matches('/'));
        vec![
            "display_errors=stderr".to_string(),
            "log_errors=0".to_string(),
            "html_errors=0".to_string(),
            format!("memory_limit={}M", self.memory_mb),
            format!("open_basedir={}", root),
            format!("sys_temp_dir={}", workspace),
            format!("upload_tmp_dir={}", workspace),
            "allow_url_fopen=0".to_string(),
            "allow_url_include=0".to_string(),
            "enable_dl=0".to_string(),
            format!("disable_functions={}", DISABLED_FUNCTIONS.join(",")),
        ]
    }

    fn command(&self, script: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-n");
        for setting in self.settings() {
            cmd.arg("-d").arg(setting);
        }
        cmd.arg("-f")
            .arg(script)
            .current_dir(&self.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Source goes through a file, not argv: no length cap, NUL bytes allowed
    fn write_script(&self, source: &str) -> io::Result<tempfile::NamedTempFile> {
        let mut script = tempfile::Builder::new()
            .prefix("main-")
            .suffix(".php")
            .tempfile_in(&self.workspace)?;
        // a script file starts in HTML mode
        script.write_all(b"<?php\n")?;
        script.write_all(source.as_bytes())?;
        script.flush()?;
        Ok(script)
    }
}

fn pump(
    mut pipe: impl Read,
    stream: Stream,
    tx: mpsc::SyncSender<(Stream, Vec<u8>)>,
) -> io::Result<()> {
    let mut chunk = [0u8; PIPE_CHUNK_BYTES];
    loop {
        let n = pipe.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        if tx.send((stream, chunk[..n].to_vec())).is_err() {
            return Ok(());
        }
    }
}

impl Interpreter for PhpInterpreter {
    fn run(
        &mut self,
        source: &str,
        io: &mut dyn InterpreterIo,
    ) -> Result<i32, InterpreterFault> {
        let mut input = Vec::new();
        while let Some(byte) = io.read() {
            input.push(byte);
        }

        let script = self.write_script(source).map_err(InterpreterFault::Launch)?;
        let mut child = self
            .command(script.path())
            .spawn()
            .map_err(InterpreterFault::Launch)?;
        debug!("Started interpreter pid={}", child.id());

        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(InterpreterFault::Crashed("interpreter pipes unavailable".into()));
        };

        let (tx, rx) = mpsc::sync_channel(PIPE_QUEUE_DEPTH);
        let pumped = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin.write_all(&input) {
                // the script is free to exit without reading its input
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            });
            let out_tx = tx.clone();
            let out_reader = scope.spawn(move || pump(stdout, Stream::Out, out_tx));
            let err_reader = scope.spawn(move || pump(stderr, Stream::Err, tx));

            for (stream, chunk) in rx {
                for byte in chunk {
                    match stream {
                        Stream::Out => io.write_out(Some(byte as i32)),
                        Stream::Err => io.write_err(Some(byte as i32)),
                    }
                }
            }
            io.write_out(None);
            io.write_err(None);

            [writer, out_reader, err_reader]
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(io::Error::other("pipe thread panicked")))
                })
                .collect::<io::Result<Vec<()>>>()
        });

        let status = child.wait().map_err(InterpreterFault::Io)?;
        pumped.map_err(InterpreterFault::Io)?;

        match (status.code(), status.signal()) {
            (Some(code), _) => {
                debug!("Interpreter exited with code {}", code);
                Ok(code)
            }
            (None, Some(signal)) => {
                warn!("Interpreter terminated by signal {}", signal);
                Err(InterpreterFault::Signaled(signal))
            }
            (None, None) => Err(InterpreterFault::Crashed(format!(
                "unknown exit status {}",
                status
            ))),
        }
    }
}
