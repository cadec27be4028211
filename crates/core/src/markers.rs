//! Declarative markers
//!
//! Markers are the metadata tags attached to suite, fixture, and method
//! members that drive engine behavior ("this type is a test fixture", "this
//! method is cleanup", "this method times out after 2s"). They are the Rust
//! rendering of attribute/annotation metadata: plain values registered
//! alongside the code they describe and enumerated through a
//! [`MetadataProvider`](crate::metadata::MetadataProvider).
//!
//! Marker *types* are identified by a stable name string (see [`names`]) and
//! carry an explicit lineage chain so "is marker X or derived from X" queries
//! work without runtime subtyping.

use std::any::Any;
use std::fmt;
use std::time::Duration;

/// Stable marker-type names used as cache keys and in queries.
pub mod names {
    /// Marks a type as a test fixture.
    pub const TEST_SUITE: &str = "TestSuite";
    /// Marks a method as a test body.
    pub const TEST: &str = "Test";
    /// Marks a data-driven test body (derived from [`TEST`]).
    pub const DATA_TEST: &str = "DataTest";
    /// Marks a per-instance initialize method.
    pub const INITIALIZE: &str = "Initialize";
    /// Marks a per-instance cleanup method.
    pub const CLEANUP: &str = "Cleanup";
    /// Declares a test-body timeout.
    pub const TIMEOUT: &str = "Timeout";
    /// Declares a scheduling priority.
    pub const PRIORITY: &str = "Priority";
    /// Declares filtering categories.
    pub const CATEGORY: &str = "Category";
    /// Excludes a test (or a whole fixture) from execution.
    pub const IGNORE: &str = "Ignore";
    /// Free-form human description.
    pub const DESCRIPTION: &str = "Description";
    /// Declares an owner for reporting.
    pub const OWNER: &str = "Owner";
}

/// A declarative metadata tag attached to a suite, fixture, or method.
///
/// Implementations are cheap immutable values. The engine stores them as
/// `Arc<dyn Marker>` in the marker cache and queries them by type name or
/// lineage; typed access goes through [`Marker::as_any`].
pub trait Marker: fmt::Debug + Send + Sync + 'static {
    /// Stable name of this marker type (one of [`names`] for the built-ins).
    fn type_name(&self) -> &'static str;

    /// Marker-type ancestry, self first.
    ///
    /// A derived marker lists every base it should answer for in
    /// derived-from queries, e.g. `DataTest` reports `["DataTest", "Test"]`.
    fn lineage(&self) -> &'static [&'static str];

    /// Whether several instances of this marker may target one member.
    ///
    /// Single-use markers (timeout, priority) answer false; aggregation
    /// markers (category) answer true and are only reachable through the
    /// multi-valued query path.
    fn allows_multiple(&self) -> bool {
        false
    }

    /// Typed access to the concrete marker value.
    fn as_any(&self) -> &dyn Any;
}

impl dyn Marker {
    /// Whether this marker's type equals `base` or derives from it.
    pub fn derives_from(&self, base: &str) -> bool {
        self.lineage().contains(&base)
    }
}

/// Marks a type as a test fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestSuiteMarker;

impl Marker for TestSuiteMarker {
    fn type_name(&self) -> &'static str {
        names::TEST_SUITE
    }

    fn lineage(&self) -> &'static [&'static str] {
        &[names::TEST_SUITE]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Marks a method as a test body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestMarker;

impl Marker for TestMarker {
    fn type_name(&self) -> &'static str {
        names::TEST
    }

    fn lineage(&self) -> &'static [&'static str] {
        &[names::TEST]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Marks a data-driven test body; answers derived-from queries for `Test`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTestMarker;

impl Marker for DataTestMarker {
    fn type_name(&self) -> &'static str {
        names::DATA_TEST
    }

    fn lineage(&self) -> &'static [&'static str] {
        &[names::DATA_TEST, names::TEST]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Marks a per-instance initialize method.
///
/// Initialize methods run after construction and context injection, in
/// base-to-derived order across the fixture's inheritance chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitializeMarker;

impl Marker for InitializeMarker {
    fn type_name(&self) -> &'static str {
        names::INITIALIZE
    }

    fn lineage(&self) -> &'static [&'static str] {
        &[names::INITIALIZE]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Marks a per-instance cleanup method.
///
/// Cleanup methods run after the test body (own method first, then
/// inherited methods derived-to-base), even when earlier phases faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupMarker;

impl Marker for CleanupMarker {
    fn type_name(&self) -> &'static str {
        names::CLEANUP
    }

    fn lineage(&self) -> &'static [&'static str] {
        &[names::CLEANUP]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Declares a test-body timeout.
///
/// Single-use: declaring two timeouts on one method is a registration
/// defect surfaced as a contract violation, never a silent pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutMarker {
    /// Upper bound for test-body execution.
    pub limit: Duration,
}

impl TimeoutMarker {
    /// Create a timeout marker from a millisecond count.
    pub fn from_millis(millis: u64) -> Self {
        Self {
            limit: Duration::from_millis(millis),
        }
    }
}

impl Marker for TimeoutMarker {
    fn type_name(&self) -> &'static str {
        names::TIMEOUT
    }

    fn lineage(&self) -> &'static [&'static str] {
        &[names::TIMEOUT]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Declares a scheduling priority (lower value runs first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityMarker {
    pub value: i32,
}

impl Marker for PriorityMarker {
    fn type_name(&self) -> &'static str {
        names::PRIORITY
    }

    fn lineage(&self) -> &'static [&'static str] {
        &[names::PRIORITY]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Declares filtering categories.
///
/// Allows multiple instances per member; same-scope instances concatenate
/// in declaration order when aggregated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMarker {
    pub categories: Vec<String>,
}

impl CategoryMarker {
    /// Create a category marker from any collection of category names.
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories: categories.into_iter().map(Into::into).collect(),
        }
    }
}

impl Marker for CategoryMarker {
    fn type_name(&self) -> &'static str {
        names::CATEGORY
    }

    fn lineage(&self) -> &'static [&'static str] {
        &[names::CATEGORY]
    }

    fn allows_multiple(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Excludes a test (or a whole fixture) from execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IgnoreMarker {
    /// Optional human-readable reason surfaced in the NotRunnable result.
    pub reason: Option<String>,
}

impl IgnoreMarker {
    /// Create an ignore marker with a reason.
    pub fn because(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }
}

impl Marker for IgnoreMarker {
    fn type_name(&self) -> &'static str {
        names::IGNORE
    }

    fn lineage(&self) -> &'static [&'static str] {
        &[names::IGNORE]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Free-form human description attached to a test for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionMarker {
    pub text: String,
}

impl Marker for DescriptionMarker {
    fn type_name(&self) -> &'static str {
        names::DESCRIPTION
    }

    fn lineage(&self) -> &'static [&'static str] {
        &[names::DESCRIPTION]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Declares an owner for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerMarker {
    pub owner: String,
}

impl Marker for OwnerMarker {
    fn type_name(&self) -> &'static str {
        names::OWNER
    }

    fn lineage(&self) -> &'static [&'static str] {
        &[names::OWNER]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
