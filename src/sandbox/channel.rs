//! Bounded byte channel between the interpreter and the sandbox runtime
//!
//! Stdin is a pull-model source, stdout/stderr are push-model sinks that stop
//! accepting bytes once they hold `OUTPUT_LIMIT_BYTES`. Overflow is dropped
//! silently so output flooding cannot grow memory or fail the run.

use crate::core::{truncate_to_limit, OUTPUT_LIMIT_BYTES};

use super::interpreter::InterpreterIo;

/// Fixed-capacity byte sink with a write cursor
#[derive(Debug)]
pub struct BoundedBuffer {
    bytes: Vec<u8>,
    capacity: usize,
}

impl BoundedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one byte, returning false if it was dropped
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.bytes.push(byte);
        true
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.bytes.len() >= self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Captured bytes as text. Invalid UTF-8 is replaced, and the result is
    /// cut back to the capacity in case replacement widened it.
    pub fn snapshot(&self) -> String {
        let mut text = String::from_utf8_lossy(self.as_bytes()).into_owned();
        truncate_to_limit(&mut text, self.capacity);
        text
    }
}

/// Map an interpreter byte code into 0..=255. The interpreter may hand out
/// signed bytes, so negatives are shifted up by 256.
pub fn normalize_byte(code: i32) -> u8 {
    code.rem_euclid(256) as u8
}

/// Per-invocation I/O state: stdin cursor plus the two output sinks
#[derive(Debug)]
pub struct BoundedChannel {
    stdin: Vec<u8>,
    stdin_pos: usize,
    stdout: BoundedBuffer,
    stderr: BoundedBuffer,
}

impl BoundedChannel {
    pub fn open(stdin: impl Into<Vec<u8>>) -> Self {
        Self::with_capacity(stdin, OUTPUT_LIMIT_BYTES)
    }

    pub fn with_capacity(stdin: impl Into<Vec<u8>>, capacity: usize) -> Self {
        Self {
            stdin: stdin.into(),
            stdin_pos: 0,
            stdout: BoundedBuffer::new(capacity),
            stderr: BoundedBuffer::new(capacity),
        }
    }

    pub fn snapshot_out(&self) -> String {
        self.stdout.snapshot()
    }

    pub fn snapshot_err(&self) -> String {
        self.stderr.snapshot()
    }

    pub fn stdout(&self) -> &BoundedBuffer {
        &self.stdout
    }

    pub fn stderr(&self) -> &BoundedBuffer {
        &self.stderr
    }
}

fn write_to(sink: &mut BoundedBuffer, code: Option<i32>) {
    // None is a flush request; the buffer has nothing to flush
    if let Some(code) = code {
        sink.push(normalize_byte(code));
    }
}

impl InterpreterIo for BoundedChannel {
    fn read(&mut self) -> Option<u8> {
        let byte = self.stdin.get(self.stdin_pos).copied()?;
        self.stdin_pos += 1;
        Some(byte)
    }

    fn write_out(&mut self, code: Option<i32>) {
        write_to(&mut self.stdout, code);
    }

    fn write_err(&mut self, code: Option<i32>) {
        write_to(&mut self.stderr, code);
    }
}
