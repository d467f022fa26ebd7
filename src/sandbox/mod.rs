//! Sandbox module - everything that runs inside the per-request process
//!
//! This module handles:
//! - Source preprocessing (open tag stripping, prelude)
//! - The bounded byte channel the interpreter talks to
//! - The interpreter boundary and its hardened PHP CLI backend
//! - Resource limits for the sandbox process
//! - Classifying the interpreter outcome
//! - The one-shot runtime loop
//!
//! The sandbox module does NOT:
//! - Enforce the deadline (that's the isolation manager's job)
//! - Compare outputs against expected answers

pub mod channel;
pub mod classify;
pub mod interpreter;
pub mod limits;
pub mod preprocess;
pub mod runtime;

pub use channel::{BoundedBuffer, BoundedChannel};
pub use classify::classify;
pub use interpreter::{Interpreter, InterpreterFault, InterpreterIo, PhpInterpreter};
pub use limits::Limits;
pub use preprocess::preprocess;
pub use runtime::{run_once, serve_once};
