//! Adapter configuration from the environment
//!
//! The adapter is linked into programs that have no command line of ours, so
//! everything comes from environment variables:
//!
//! | Variable       | Values                  | Default  |
//! |----------------|-------------------------|----------|
//! | `HILO_BACKEND` | `null`, `log`, `json`   | `log`    |
//! | `HILO_OUTPUT`  | file path (json only)   | stderr   |
//! | `HILO_LOG`     | `tracing` env filter    | `warn`   |

use crate::backend::{Backend, JsonLinesBackend, LogBackend, NullBackend};
use anyhow::{Context, Result};
use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const BACKEND_VAR: &str = "HILO_BACKEND";
pub const OUTPUT_VAR: &str = "HILO_OUTPUT";
pub const LOG_VAR: &str = "HILO_LOG";

const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown backend {0:?} (expected null, log or json)")]
    UnknownBackend(String),

    #[error("HILO_OUTPUT is set but the {0} backend does not write files")]
    OutputWithoutJson(BackendKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    Null,
    #[default]
    Log,
    Json,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null" | "none" | "off" => Ok(BackendKind::Null),
            "log" | "tracing" => Ok(BackendKind::Log),
            "json" | "jsonl" => Ok(BackendKind::Json),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::Null => "null",
            BackendKind::Log => "log",
            BackendKind::Json => "json",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub backend: BackendKind,
    /// Output file of the json backend; stderr when unset
    pub output: Option<PathBuf>,
    /// `tracing` filter directive
    pub log_filter: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            output: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AdapterConfig {
    /// Parse from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> std::result::Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match lookup(BACKEND_VAR) {
            Some(value) if !value.trim().is_empty() => value.parse()?,
            _ => BackendKind::default(),
        };

        let output = lookup(OUTPUT_VAR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        if output.is_some() && backend != BackendKind::Json {
            return Err(ConfigError::OutputWithoutJson(backend));
        }

        let log_filter = lookup(LOG_VAR)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            backend,
            output,
            log_filter,
        })
    }

    /// Read the process environment. Invalid settings fall back to the
    /// defaults with a warning; a misconfigured variable must not stop the
    /// instrumented program.
    pub fn from_env() -> Self {
        match Self::from_lookup(|name| std::env::var(name).ok()) {
            Ok(config) => config,
            Err(error) => {
                eprintln!("hilo: ignoring configuration: {}", error);
                Self::default()
            }
        }
    }

    /// Construct the configured backend.
    pub fn build_backend(&self) -> Result<Box<dyn Backend>> {
        let backend: Box<dyn Backend> = match self.backend {
            BackendKind::Null => Box::new(NullBackend),
            BackendKind::Log => Box::new(LogBackend),
            BackendKind::Json => match &self.output {
                Some(path) => {
                    let file = File::create(path).with_context(|| {
                        format!("Failed to create event output file {}", path.display())
                    })?;
                    Box::new(JsonLinesBackend::new(Box::new(file)))
                }
                None => Box::new(JsonLinesBackend::new(Box::new(std::io::stderr()))),
            },
        };
        Ok(backend)
    }
}

/// Install the stderr `tracing` subscriber with `filter`.
///
/// Does nothing if the host program already installed a global subscriber.
pub fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
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
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = AdapterConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AdapterConfig::default());
        assert_eq!(config.backend, BackendKind::Log);
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn test_json_with_output() {
        let config = AdapterConfig::from_lookup(lookup(&[
            ("HILO_BACKEND", "JSON"),
            ("HILO_OUTPUT", "/tmp/events.jsonl"),
            ("HILO_LOG", "hilo=debug"),
        ]))
        .unwrap();
        assert_eq!(config.backend, BackendKind::Json);
        assert_eq!(config.output, Some(PathBuf::from("/tmp/events.jsonl")));
        assert_eq!(config.log_filter, "hilo=debug");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = AdapterConfig::from_lookup(lookup(&[("HILO_BACKEND", "otlp")])).unwrap_err();
        assert_eq!(err, ConfigError::UnknownBackend("otlp".to_string()));
    }

    #[test]
    fn test_output_requires_json_backend() {
        let err = AdapterConfig::from_lookup(lookup(&[("HILO_OUTPUT", "out.jsonl")])).unwrap_err();
        assert_eq!(err, ConfigError::OutputWithoutJson(BackendKind::Log));
    }

    #[test]
    fn test_blank_values_mean_default() {
        let config =
            AdapterConfig::from_lookup(lookup(&[("HILO_BACKEND", " "), ("HILO_LOG", "")])).unwrap();
        assert_eq!(config, AdapterConfig::default());
    }

    #[test]
    fn test_build_backend_reports_missing_directory() {
        let config = AdapterConfig {
            backend: BackendKind::Json,
            output: Some(PathBuf::from("/nonexistent-hilo-dir/events.jsonl")),
            ..AdapterConfig::default()
        };
        let err = config.build_backend().err().unwrap();
        assert!(err.to_string().contains("Failed to create event output file"));
    }

    #[test]
    fn test_build_null_backend() {
        let config = AdapterConfig {
            backend: BackendKind::Null,
            ..AdapterConfig::default()
        };
        assert!(config.build_backend().is_ok());
    }
}
