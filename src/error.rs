use std::io;
use thiserror::Error;

/// Errors outside the execution status taxonomy
#[derive(Debug, Error)]
pub enum ExecError {
    /// Rejected before any process was spawned
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Failed to prepare sandbox workspace: {0}")]
    Workspace(#[source] io::Error),
    #[error("Failed to spawn sandbox process: {0}")]
    Spawn(#[source] io::Error),
}

impl ExecError {
    /// True when the caller is at fault rather than the worker
    pub fn is_client_error(&self) -> bool {
        matches!(self, ExecError::InvalidRequest(_))
    }
}
