pub mod protocol;
pub mod status;

pub use protocol::{
    truncate_to_limit, ExecutionRequest, ExecutionResult, SandboxMessage, OUTPUT_LIMIT_BYTES,
};
pub use status::ExecutionStatus;
