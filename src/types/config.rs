//! Configuration structures.
//!
//! Configuration is loaded from a JSON file; every section falls back to
//! its defaults when omitted.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::{Error, Result};

/// Global runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Per-module queue sizes and scheduler settings.
    #[serde(default)]
    pub module: ModuleConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Fault boundary configuration.
    #[serde(default)]
    pub fault: FaultConfig,

    /// Operator console configuration.
    #[serde(default)]
    pub console: ConsoleConfig,
}

impl Config {
    /// Load and validate configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse and validate configuration from a JSON document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.module.worker_threads == 0 {
            return Err(Error::validation("module.worker_threads must be greater than zero"));
        }
        Ok(())
    }
}

/// Module scheduler configuration.
///
/// A length of zero disables the corresponding facility: calls to it fail
/// with `Error::Unavailable` (or `TooManyCalls` for asynchronous calls).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Capacity of the module's data-plane call queue.
    pub chanrpc_len: usize,

    /// Capacity of the module's command call queue.
    pub command_len: usize,

    /// Maximum outstanding asynchronous calls issued by the module.
    pub async_call_len: usize,

    /// Capacity of the worker-pool completion channel.
    pub go_len: usize,

    /// Capacity of the timer fire channel.
    pub timer_dispatcher_len: usize,

    /// Maximum worker-pool jobs running at once.
    pub worker_threads: usize,

    /// Handlers running longer than this are logged as slow.
    #[serde(with = "humantime_serde")]
    pub slow_handler_threshold: Duration,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            chanrpc_len: 10_000,
            command_len: 10_000,
            async_call_len: 10_000,
            go_len: 10_000,
            timer_dispatcher_len: 10_000,
            worker_threads: 4,
            slow_handler_threshold: Duration::from_secs(1),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Fault boundary configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Maximum bytes of backtrace attached to a handler fault. Zero disables capture.
    pub trace_bytes: usize,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self { trace_bytes: 4096 }
    }
}

/// Operator console configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub prompt: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prompt: "chanrpc# ".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.module.chanrpc_len, 10_000);
        assert_eq!(config.module.command_len, 10_000);
        assert_eq!(config.fault.trace_bytes, 4096);
        assert_eq!(config.console.prompt, "chanrpc# ");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_json(
            r#"{"module": {"async_call_len": 2, "slow_handler_threshold": "250ms"}}"#,
        )
        .unwrap();
        assert_eq!(config.module.async_call_len, 2);
        assert_eq!(config.module.go_len, 10_000);
        assert_eq!(config.module.slow_handler_threshold, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_worker_threads_rejected() {
        let err = Config::from_json(r#"{"module": {"worker_threads": 0}}"#).unwrap_err();
        assert!(err.to_string().contains("worker_threads"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"observability": {{"json_logs": true}}}}"#).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(config.observability.json_logs);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Config::from_file("/nonexistent/chanrpc.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
