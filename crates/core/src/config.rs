//! Run configuration resolution and parsing
//!
//! The run configuration carries the process-wide execution defaults: the
//! default test timeout applied when a method declares none, the worker
//! count for parallel scheduling, and the fail-fast flag. It is resolved in
//! layers:
//!
//! 1. Built-in defaults
//! 2. An optional JSON-with-comments file (json5: comments and trailing
//!    commas are accepted)
//! 3. Environment variable overrides (`PROCTOR_DEFAULT_TIMEOUT_MS`,
//!    `PROCTOR_WORKERS`, `PROCTOR_FAIL_FAST`)
//!
//! Unknown file fields are logged at DEBUG level for forward compatibility
//! and otherwise ignored.

use crate::errors::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const KNOWN_FIELDS: &[&str] = &["defaultTimeoutMs", "workers", "failFast"];

/// Process-wide execution defaults for a test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    /// Default test-body timeout in milliseconds; None means unbounded for
    /// methods that declare no timeout of their own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,

    /// Worker count for parallel scheduling; None means one worker per
    /// available CPU.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Stop scheduling new tests after the first failure.
    pub fail_fast: bool,
}

impl RunConfig {
    /// Load a configuration file.
    ///
    /// The file is parsed as JSON-with-comments. Unknown fields are logged
    /// at DEBUG and ignored; missing files are an error (callers decide
    /// whether a config file is optional).
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config = Self::from_json(&text)?;
        debug!(?config, "Loaded run configuration");
        Ok(config)
    }

    /// Parse a configuration document from a JSON-with-comments string.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value =
            json5::from_str(text).map_err(|e| ConfigError::Parsing {
                message: e.to_string(),
            })?;
        if let Some(object) = value.as_object() {
            for key in object.keys() {
                if !KNOWN_FIELDS.contains(&key.as_str()) {
                    debug!(field = %key, "Ignoring unknown run configuration field");
                }
            }
        }
        let config: RunConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::Parsing {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of this configuration.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup("PROCTOR_DEFAULT_TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(millis) => self.default_timeout_ms = Some(millis),
                Err(_) => warn!(
                    "Invalid PROCTOR_DEFAULT_TIMEOUT_MS value '{}', keeping {:?}",
                    raw, self.default_timeout_ms
                ),
            }
        }
        if let Some(raw) = lookup("PROCTOR_WORKERS") {
            match raw.parse::<usize>() {
                Ok(workers) => self.workers = Some(workers),
                Err(_) => warn!(
                    "Invalid PROCTOR_WORKERS value '{}', keeping {:?}",
                    raw, self.workers
                ),
            }
        }
        if let Some(raw) = lookup("PROCTOR_FAIL_FAST") {
            match raw.parse::<bool>() {
                Ok(fail_fast) => self.fail_fast = fail_fast,
                Err(_) => warn!("Invalid PROCTOR_FAIL_FAST value '{}', ignoring", raw),
            }
        }
        self
    }

    /// Validate field ranges.
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_ms == Some(0) {
            return Err(ConfigError::Validation {
                message: "defaultTimeoutMs must be greater than zero".to_string(),
            }
            .into());
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Validation {
                message: "workers must be greater than zero".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// The default test-body timeout as a duration.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    /// Effective worker count: configured value, else one per CPU.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}
