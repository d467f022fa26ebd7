//! One-shot sandbox runtime
//!
//! Runs inside the per-request child process: reads exactly one
//! `SandboxMessage` from stdin, runs it through a fresh interpreter and writes
//! exactly one `ExecutionResult` line to stdout. All buffers live in this
//! invocation only and die with the process.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use tracing::{debug, info};

use crate::core::{ExecutionResult, SandboxMessage};

use super::channel::BoundedChannel;
use super::classify::classify;
use super::interpreter::Interpreter;
use super::preprocess::preprocess;

/// Execute one message and classify the outcome
pub fn run_once(message: &SandboxMessage, interpreter: &mut dyn Interpreter) -> ExecutionResult {
    let source = preprocess(&message.code);
    let mut channel = BoundedChannel::open(message.input.as_bytes());

    let outcome = interpreter.run(&source, &mut channel);
    debug!(
        "Interpreter finished: outcome={:?}, stdout={}B, stderr={}B",
        outcome,
        channel.stdout().len(),
        channel.stderr().len()
    );

    classify(&outcome, channel.snapshot_out(), channel.snapshot_err())
}

/// Read the single inbound message, run it and emit the single reply.
///
/// Anything after the first line of input is never read.
pub fn serve_once(
    input: &mut impl BufRead,
    output: &mut impl Write,
    interpreter: &mut dyn Interpreter,
) -> Result<ExecutionResult> {
    let mut line = String::new();
    let n = input
        .read_line(&mut line)
        .context("Failed to read sandbox message")?;
    if n == 0 {
        anyhow::bail!("Sandbox input closed before a message arrived");
    }
    let message: SandboxMessage =
        serde_json::from_str(&line).context("Failed to parse sandbox message")?;
    info!(
        "Sandbox received message: code={}B, input={}B",
        message.code.len(),
        message.input.len()
    );

    let result = run_once(&message, interpreter);

    let mut reply = serde_json::to_vec(&result).context("Failed to encode sandbox reply")?;
    reply.push(b'\n');
    output
        .write_all(&reply)
        .and_then(|_| output.flush())
        .context("Failed to send sandbox reply")?;

    info!("Sandbox replied: status={}", result.status);
    Ok(result)
}
