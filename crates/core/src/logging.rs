//! Logging and observability
//!
//! Structured logging for the engine via tracing-subscriber, with text or
//! JSON formatting selected at runtime (argument or environment variable,
//! no feature flags). All log output goes to stderr so stdout stays free
//! for test reporting.
//!
//! ## Environment Variables
//!
//! * `PROCTOR_LOG_FORMAT` - output format ("json" for JSON, anything else
//!   for text)
//! * `PROCTOR_LOG` - logging filter specification
//! * `RUST_LOG` - standard filter variable, used as fallback

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the logging system with an optional format specification.
///
/// Safe to call multiple times; subsequent calls are no-ops. Format is
/// taken from the argument first, then `PROCTOR_LOG_FORMAT`, defaulting to
/// text. The filter comes from `PROCTOR_LOG`, falling back to `RUST_LOG`,
/// then `info`.
pub fn init(format: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter();

        let env_format = std::env::var("PROCTOR_LOG_FORMAT").ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");

        match effective_format {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
            _ => {
                // Default to text format (including None or any other value)
                tracing_subscriber::registry()
                    .with(fmt::layer().with_target(true).with_writer(io::stderr))
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!("Logging initialized with format: {}", effective_format);
    });

    Ok(())
}

/// Create an EnvFilter based on environment variables
fn create_env_filter() -> EnvFilter {
    if let Ok(proctor_log) = std::env::var("PROCTOR_LOG") {
        EnvFilter::try_new(&proctor_log).unwrap_or_else(|_| {
            tracing::warn!(
                "Invalid PROCTOR_LOG specification '{}', using default 'info'",
                proctor_log
            );
            EnvFilter::new("info")
        })
    } else {
        // Fall back to standard RUST_LOG or default (info)
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Check if logging has been initialized
///
/// Primarily useful for testing scenarios where you need to know if the
/// logging system has already been set up.
pub fn is_initialized() -> bool {
    INIT.is_completed()
}
