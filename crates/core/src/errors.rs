//! Error types and handling
//!
//! This module provides domain-specific error types for the execution engine.
//! The error taxonomy is structured with specific error enums for each domain
//! (Metadata, Resolver, Descriptor, Config) that are then wrapped in the main
//! ProctorError enum for unified error handling.
//!
//! Test failures are deliberately NOT errors: a faulting test phase is
//! classified and folded into a `TestResult` by the invoker. The types here
//! cover failures of the framework itself (bad registrations, unreadable
//! configuration, metadata enumeration faults).

use thiserror::Error;

/// Metadata-enumeration errors
///
/// Raised by `MetadataProvider` implementations when the markers declared on
/// a member cannot be enumerated. The marker cache records these as degraded
/// entries rather than propagating them to query callers.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// The member is not known to the provider
    #[error("Unknown member: {member}")]
    UnknownMember { member: String },

    /// A marker instance could not be materialized
    #[error("Failed to materialize marker '{marker_type}' on {member}: {message}")]
    Materialization {
        member: String,
        marker_type: String,
        message: String,
    },

    /// The provider's backing table is internally inconsistent
    #[error("Metadata table inconsistency: {message}")]
    Inconsistent { message: String },
}

/// Marker-resolution errors
#[derive(Error, Debug)]
pub enum ResolverError {
    /// A single-use marker appears more than once on one member
    #[error("Marker '{marker_type}' does not allow multiple instances but {count} were declared on {member}")]
    MultipleMarkers {
        member: String,
        marker_type: String,
        count: usize,
    },
}

/// Descriptor-construction errors
///
/// Raised while resolving a fixture or method registration into the
/// read-only descriptors the invoker executes against.
#[derive(Error, Debug)]
pub enum DescriptorError {
    /// The requested fixture type is not registered
    #[error("Fixture type not registered: {type_name}")]
    UnknownFixture { type_name: String },

    /// The requested method is not registered on the fixture
    #[error("Method '{method}' is not registered on fixture {type_name}")]
    UnknownMethod { type_name: String, method: String },

    /// The fixture does not carry the test-suite marker
    #[error("Type {type_name} is not marked as a test fixture")]
    NotATestFixture { type_name: String },

    /// The method does not carry a test marker (or one derived from it)
    #[error("Method {type_name}::{method} is not marked as a test")]
    NotATestMethod { type_name: String, method: String },

    /// The fixture has no registered constructor
    #[error("Fixture {type_name} has no registered constructor")]
    MissingConstructor { type_name: String },

    /// More than one method on one fixture carries the same lifecycle marker
    #[error("Fixture {type_name} declares multiple '{marker_type}' methods: {first} and {second}")]
    DuplicateLifecycleMethod {
        type_name: String,
        marker_type: String,
        first: String,
        second: String,
    },

    /// A base-fixture reference points at an unregistered type
    #[error("Fixture {type_name} inherits from unregistered type {base}")]
    UnknownBase { type_name: String, base: String },

    /// The base chain loops back on itself
    #[error("Cycle detected in fixture inheritance chain starting at {type_name}")]
    InheritanceCycle { type_name: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file parsing error
    #[error("Failed to parse run configuration: {message}")]
    Parsing { message: String },

    /// Configuration validation error
    #[error("Run configuration validation error: {message}")]
    Validation { message: String },

    /// Configuration file I/O error
    #[error("Failed to read run configuration file")]
    Io(#[from] std::io::Error),

    /// Configuration file not found
    #[error("Run configuration file not found: {path}")]
    NotFound { path: String },
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum ProctorError {
    /// Metadata-enumeration errors
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Marker-resolution errors
    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    /// Descriptor-construction errors
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invocation plumbing errors (worker spawn, channel teardown)
    #[error("Invocation error: {0}")]
    Invocation(String),
}

/// Convenience type alias for Results with ProctorError
pub type Result<T> = std::result::Result<T, ProctorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_metadata_error_display() {
        let error = MetadataError::UnknownMember {
            member: "demo::Missing".to_string(),
        };
        assert_eq!(format!("{}", error), "Unknown member: demo::Missing");

        let error = MetadataError::Materialization {
            member: "demo::Widget".to_string(),
            marker_type: "Timeout".to_string(),
            message: "poisoned table".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Failed to materialize marker 'Timeout' on demo::Widget: poisoned table"
        );
    }

    #[test]
    fn test_resolver_error_display() {
        let error = ResolverError::MultipleMarkers {
            member: "demo::Widget::build".to_string(),
            marker_type: "Timeout".to_string(),
            count: 2,
        };
        assert_eq!(
            format!("{}", error),
            "Marker 'Timeout' does not allow multiple instances but 2 were declared on demo::Widget::build"
        );
    }

    #[test]
    fn test_descriptor_error_display() {
        let error = DescriptorError::UnknownFixture {
            type_name: "demo::Ghost".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Fixture type not registered: demo::Ghost"
        );

        let error = DescriptorError::DuplicateLifecycleMethod {
            type_name: "demo::Widget".to_string(),
            marker_type: "Initialize".to_string(),
            first: "setup_a".to_string(),
            second: "setup_b".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Fixture demo::Widget declares multiple 'Initialize' methods: setup_a and setup_b"
        );
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Parsing {
            message: "Invalid JSON".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Failed to parse run configuration: Invalid JSON"
        );

        let error = ConfigError::NotFound {
            path: "/path/to/proctor.json".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Run configuration file not found: /path/to/proctor.json"
        );
    }

    #[test]
    fn test_proctor_error_from_domain_errors() {
        let metadata_error = MetadataError::UnknownMember {
            member: "demo::Missing".to_string(),
        };
        let proctor_error: ProctorError = metadata_error.into();
        assert!(matches!(proctor_error, ProctorError::Metadata(_)));

        let resolver_error = ResolverError::MultipleMarkers {
            member: "m".to_string(),
            marker_type: "Timeout".to_string(),
            count: 2,
        };
        let proctor_error: ProctorError = resolver_error.into();
        assert!(matches!(proctor_error, ProctorError::Resolver(_)));

        let descriptor_error = DescriptorError::UnknownFixture {
            type_name: "demo::Ghost".to_string(),
        };
        let proctor_error: ProctorError = descriptor_error.into();
        assert!(matches!(proctor_error, ProctorError::Descriptor(_)));

        let config_error = ConfigError::Parsing {
            message: "bad".to_string(),
        };
        let proctor_error: ProctorError = config_error.into();
        assert!(matches!(proctor_error, ProctorError::Config(_)));
    }

    #[test]
    fn test_anyhow_conversions() {
        let config_error = ConfigError::Parsing {
            message: "Test".to_string(),
        };
        // thiserror automatically provides the conversion
        let anyhow_error = anyhow::Error::from(config_error);
        assert!(anyhow_error
            .to_string()
            .contains("Failed to parse run configuration"));
    }

    #[test]
    fn test_error_source_chain() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let config_error = ConfigError::Io(io_error);
        let proctor_error = ProctorError::Config(config_error);

        // Source chain is preserved through the wrapping layers
        assert!(proctor_error.source().is_some());
        if let Some(source) = proctor_error.source() {
            assert!(source.source().is_some()); // The underlying io::Error
        }
    }
}
