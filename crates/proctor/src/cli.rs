//! Harness argument surface
//!
//! The front-end is linked into user test binaries; these are the
//! arguments such a binary accepts. Parsing is plain clap derive; the
//! binary's `main` forwards `std::env::args` through
//! [`crate::main`](crate::main) or calls [`crate::run_suite`] directly.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

/// Log level options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

impl LogLevel {
    /// The tracing filter directive for this level.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Arguments accepted by a proctor test binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "proctor",
    about = "Run the test suites registered in this binary",
    version
)]
pub struct HarnessArgs {
    /// Regex filter applied to fully qualified test names
    pub filter: Option<String>,

    /// Only run tests carrying this category (repeatable; any match selects)
    #[arg(long = "category")]
    pub categories: Vec<String>,

    /// List the selected tests without running them
    #[arg(long)]
    pub list: bool,

    /// Report format on stdout
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,

    /// Log format on stderr
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Log verbosity (overrides PROCTOR_LOG)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Worker thread count (overrides configuration)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Stop scheduling new tests after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Path to a run configuration file (JSON with comments)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Default for HarnessArgs {
    fn default() -> Self {
        Self {
            filter: None,
            categories: Vec::new(),
            list: false,
            output_format: OutputFormat::Text,
            log_format: LogFormat::Text,
            log_level: None,
            workers: None,
            fail_fast: false,
            config: None,
        }
    }
}

impl HarnessArgs {
    /// Parse from an explicit argument vector (first element is the binary
    /// name, as in `std::env::args`).
    pub fn parse_from_args<I, S>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = HarnessArgs::parse_from_args(["proctor"]).unwrap();
        assert_eq!(args.filter, None);
        assert!(args.categories.is_empty());
        assert!(!args.list);
        assert_eq!(args.output_format, OutputFormat::Text);
        assert_eq!(args.workers, None);
        assert!(!args.fail_fast);
    }

    #[test]
    fn test_full_invocation() {
        let args = HarnessArgs::parse_from_args([
            "proctor",
            "Widget::build",
            "--category",
            "fast",
            "--category",
            "nightly",
            "--output-format",
            "json",
            "--log-level",
            "debug",
            "--workers",
            "2",
            "--fail-fast",
        ])
        .unwrap();
        assert_eq!(args.filter.as_deref(), Some("Widget::build"));
        assert_eq!(args.categories, vec!["fast", "nightly"]);
        assert_eq!(args.output_format, OutputFormat::Json);
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert_eq!(args.workers, Some(2));
        assert!(args.fail_fast);
    }

    #[test]
    fn test_invalid_output_format_is_rejected() {
        assert!(HarnessArgs::parse_from_args(["proctor", "--output-format", "yaml"]).is_err());
    }
}
