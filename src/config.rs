//! Worker configuration
//!
//! Loaded once from the environment (optionally seeded from `.env`).

use anyhow::Context;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::warn;

use crate::sandbox::Limits;

/// Worker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Address the HTTP server binds to (default: 0.0.0.0:80)
    pub listen_addr: String,
    /// PHP CLI binary used by the sandbox (default: php)
    pub php_binary: PathBuf,
    /// Program started as the sandbox runtime (default: this executable)
    pub sandbox_program: Option<PathBuf>,
    /// Resource limits inside the sandbox
    pub limits: Limits,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:80".to_string(),
            php_binary: PathBuf::from("php"),
            sandbox_program: None,
            limits: Limits::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let limit = |key: &str, default: u64| -> anyhow::Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("Invalid {}: {}", key, raw)),
                None => Ok(default),
            }
        };

        let limits = Limits {
            memory_mb: limit("SANDBOX_MEMORY_LIMIT_MB", defaults.limits.memory_mb)?,
            address_space_mb: limit(
                "SANDBOX_ADDRESS_SPACE_LIMIT_MB",
                defaults.limits.address_space_mb,
            )?,
            processes: limit("SANDBOX_PROCESS_LIMIT", defaults.limits.processes)?,
            cpu_secs: limit("SANDBOX_CPU_LIMIT_SECS", defaults.limits.cpu_secs)?,
            fsize_kb: limit("SANDBOX_FILE_SIZE_LIMIT_KB", defaults.limits.fsize_kb)?,
        };

        Ok(Self {
            listen_addr: lookup("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            php_binary: lookup("PHP_BINARY")
                .map(PathBuf::from)
                .unwrap_or(defaults.php_binary),
            sandbox_program: lookup("SANDBOX_PROGRAM").map(PathBuf::from),
            limits,
        })
    }

    /// Sandbox program, falling back to the running executable
    pub fn resolve_sandbox_program(&self) -> anyhow::Result<PathBuf> {
        match &self.sandbox_program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe().context("Failed to locate worker executable"),
        }
    }
}

/// Global worker configuration
static WORKER_CONFIG: OnceLock<WorkerConfig> = OnceLock::new();

/// Install the worker configuration
pub fn init_config(config: WorkerConfig) -> anyhow::Result<&'static WorkerConfig> {
    WORKER_CONFIG
        .set(config)
        .map_err(|_| anyhow::anyhow!("Worker configuration already initialized"))?;
    Ok(get_config())
}

/// Get worker configuration
pub fn get_config() -> &'static WorkerConfig {
    WORKER_CONFIG.get().unwrap_or_else(|| {
        static DEFAULT: OnceLock<WorkerConfig> = OnceLock::new();

        warn!("Worker configuration not initialized, using default");
        DEFAULT.get_or_init(WorkerConfig::default)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.listen_addr, "0.0.0.0:80");
    }

    #[test]
    fn test_overrides() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("LISTEN_ADDR", "127.0.0.1:8080"),
            ("PHP_BINARY", "/usr/bin/php8.3"),
            ("SANDBOX_PROGRAM", "/opt/worker"),
            ("SANDBOX_FILE_SIZE_LIMIT_KB", "64"),
            ("SANDBOX_MEMORY_LIMIT_MB", "128"),
            ("SANDBOX_ADDRESS_SPACE_LIMIT_MB", "768"),
            ("SANDBOX_PROCESS_LIMIT", "32"),
            ("SANDBOX_CPU_LIMIT_SECS", " 3 "),
        ]))
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.php_binary, PathBuf::from("/usr/bin/php8.3"));
        assert_eq!(config.sandbox_program, Some(PathBuf::from("/opt/worker")));
        assert_eq!(
            config.limits,
            Limits {
                memory_mb: 128,
                address_space_mb: 768,
                processes: 32,
                cpu_secs: 3,
                fsize_kb: 64,
            }
        );
        assert_eq!(
            config.resolve_sandbox_program().unwrap(),
            PathBuf::from("/opt/worker")
        );
    }

    #[test]
    fn test_invalid_limits() {
        let err = WorkerConfig::from_lookup(lookup(&[("SANDBOX_FILE_SIZE_LIMIT_KB", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("SANDBOX_FILE_SIZE_LIMIT_KB"));

        let err = WorkerConfig::from_lookup(lookup(&[("SANDBOX_PROCESS_LIMIT", "-1")]))
            .unwrap_err();
        assert!(err.to_string().contains("SANDBOX_PROCESS_LIMIT"));
    }
}
