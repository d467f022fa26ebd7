//! Request, result and inter-process message types

use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;
use std::time::Duration;

use super::status::ExecutionStatus;

/// Maximum number of bytes captured per output stream (10 KiB)
pub const OUTPUT_LIMIT_BYTES: usize = 10 * 1024;

/// One execution request, owned by a single isolation manager invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub code: String,
    pub stdin: String,
    pub max_duration_ms: NonZeroU64,
}

impl ExecutionRequest {
    pub fn new(
        code: impl Into<String>,
        stdin: impl Into<String>,
        max_duration_ms: NonZeroU64,
    ) -> Self {
        Self {
            code: code.into(),
            stdin: stdin.into(),
            max_duration_ms,
        }
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms.get())
    }

    /// The single message delivered to the sandbox process
    pub fn to_message(&self) -> SandboxMessage {
        SandboxMessage {
            code: self.code.clone(),
            input: self.stdin.clone(),
        }
    }
}

/// Result returned exactly once per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn timeout(max_duration_ms: NonZeroU64) -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            stdout: String::new(),
            stderr: format!("Time Limit Exceeded: {} msec", max_duration_ms),
        }
    }

    pub fn runtime_error(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::RuntimeError,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Parent -> sandbox message. Exactly one is ever sent per process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxMessage {
    pub code: String,
    pub input: String,
}

/// Cut `text` to at most `max_bytes`, backing off to a char boundary
pub fn truncate_to_limit(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}
