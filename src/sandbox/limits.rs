//! Resource limits applied to the sandbox process before the interpreter
//! starts. Inherited by every process the interpreter spawns.

use nix::sys::resource::{setrlimit, Resource};

/// Resource limits for the sandbox process
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    /// Interpreter heap limit (PHP `memory_limit`), in MB
    pub memory_mb: u64,
    /// Address space of the sandbox and interpreter processes, in MB
    pub address_space_mb: u64,
    /// Maximum number of processes for the sandbox's user
    pub processes: u64,
    /// CPU time per process, in seconds
    pub cpu_secs: u64,
    /// Maximum size of any file the submission writes, in KB
    pub fsize_kb: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            memory_mb: 256,
            address_space_mb: 1024,
            processes: 512,
            cpu_secs: 10,
            fsize_kb: 10240,
        }
    }
}

impl Limits {
    /// Apply to the current process. Only calls `setrlimit`, so it is safe
    /// between fork and exec.
    pub fn apply(&self) -> nix::Result<()> {
        setrlimit(Resource::RLIMIT_CORE, 0, 0)?;

        let fsize_bytes = self.fsize_kb.saturating_mul(1024);
        setrlimit(Resource::RLIMIT_FSIZE, fsize_bytes, fsize_bytes)?;

        let address_space_bytes = self.address_space_mb.saturating_mul(1024 * 1024);
        setrlimit(Resource::RLIMIT_AS, address_space_bytes, address_space_bytes)?;

        setrlimit(Resource::RLIMIT_NPROC, self.processes, self.processes)?;

        // soft limit raises SIGXCPU, the hard limit one second later SIGKILL
        setrlimit(
            Resource::RLIMIT_CPU,
            self.cpu_secs,
            self.cpu_secs.saturating_add(1),
        )?;
        Ok(())
    }
}
