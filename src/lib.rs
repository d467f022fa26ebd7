//! Sandboxed PHP execution worker for live code golf battles.
//!
//! One request in, one isolated process, exactly one `ExecutionResult` out.

pub mod config;
pub mod core;
pub mod dispatcher;
pub mod error;
pub mod isolation;
pub mod sandbox;

pub use crate::core::{ExecutionRequest, ExecutionResult, ExecutionStatus, OUTPUT_LIMIT_BYTES};
pub use dispatcher::{Dispatcher, Executor};
pub use error::ExecError;
pub use isolation::{IsolationManager, SandboxCommand};
