//! Core library for the proctor test execution engine
//!
//! This crate contains the test lifecycle execution engine and the marker
//! resolution subsystem: fixture registration, marker caching and queries,
//! lifecycle descriptors, the six-phase invoker, outcome/failure modeling,
//! plus configuration, logging, and error handling shared with the harness
//! front-end.

pub mod cache;
pub mod config;
pub mod context;
pub mod descriptors;
pub mod errors;
pub mod fault;
pub mod invoker;
pub mod logging;
pub mod markers;
pub mod metadata;
pub mod outcome;
pub mod registry;
pub mod resolver;

// Re-export IndexMap for use by dependent crates (preserves insertion order for ordered maps)
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
