use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one execution request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    RuntimeError,
    /// Only ever declared by the isolation manager, never by the sandbox
    Timeout,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::RuntimeError => "runtime_error",
            ExecutionStatus::Timeout => "timeout",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ExecutionStatus::Success.to_string(), "success");
        assert_eq!(ExecutionStatus::RuntimeError.to_string(), "runtime_error");
        assert_eq!(ExecutionStatus::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_status_serde_matches_display() {
        for status in [
            ExecutionStatus::Success,
            ExecutionStatus::RuntimeError,
            ExecutionStatus::Timeout,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
    }
}
