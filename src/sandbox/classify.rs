//! Maps an interpreter outcome onto the execution status taxonomy

use crate::core::{truncate_to_limit, ExecutionResult, ExecutionStatus, OUTPUT_LIMIT_BYTES};

use super::interpreter::InterpreterFault;

/// Build the result for one interpreter run.
///
/// Never produces `Timeout`; only the isolation manager declares that.
pub fn classify(
    outcome: &Result<i32, InterpreterFault>,
    stdout: String,
    stderr: String,
) -> ExecutionResult {
    match outcome {
        Err(fault) => ExecutionResult {
            status: ExecutionStatus::RuntimeError,
            stdout,
            stderr: append_fault(stderr, &fault.to_string()),
        },
        Ok(0) => ExecutionResult {
            status: ExecutionStatus::Success,
            stdout,
            stderr,
        },
        Ok(_) => ExecutionResult {
            status: ExecutionStatus::RuntimeError,
            stdout,
            stderr,
        },
    }
}

/// `captured + "\n" + description`, giving up captured bytes (not the
/// description) when the combination would pass the output limit
fn append_fault(mut captured: String, description: &str) -> String {
    let mut description = description.to_string();
    truncate_to_limit(&mut description, OUTPUT_LIMIT_BYTES - 1);
    truncate_to_limit(&mut captured, OUTPUT_LIMIT_BYTES - 1 - description.len());
    captured.push('\n');
    captured.push_str(&description);
    captured
}
