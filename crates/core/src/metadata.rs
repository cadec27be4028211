//! Member identity and metadata introspection
//!
//! The engine never touches runtime reflection directly. Everything it knows
//! about markers flows through the [`MetadataProvider`] capability trait,
//! keyed by opaque [`MemberId`] values. Implementations may back the trait
//! with a precomputed registration table (the in-tree
//! [`Registry`](crate::registry::Registry)), generated code, or any other
//! introspection mechanism, as long as the caching and fallback behavior of
//! the consumers holds.

use crate::errors::MetadataError;
use crate::markers::Marker;
use std::fmt;
use std::sync::Arc;

/// The scope a member identity refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberScope {
    /// A whole test suite (the assembly-level scope).
    Suite,
    /// A fixture type.
    Type,
    /// A method on a fixture.
    Method,
}

impl MemberScope {
    /// Get the scope name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberScope::Suite => "suite",
            MemberScope::Type => "type",
            MemberScope::Method => "method",
        }
    }
}

/// Opaque identity of a suite, fixture type, or method.
///
/// Names are `::`-separated full paths (`demo`, `demo::Counter`,
/// `demo::Counter::increment`). The id is cheap to clone and hashable, which
/// is what the marker cache keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberId {
    scope: MemberScope,
    name: Arc<str>,
}

impl MemberId {
    /// Identity of a suite.
    pub fn suite(name: impl Into<Arc<str>>) -> Self {
        Self {
            scope: MemberScope::Suite,
            name: name.into(),
        }
    }

    /// Identity of a fixture type.
    pub fn fixture(name: impl Into<Arc<str>>) -> Self {
        Self {
            scope: MemberScope::Type,
            name: name.into(),
        }
    }

    /// Identity of a method, from its full `Type::method` path.
    pub fn method(name: impl Into<Arc<str>>) -> Self {
        Self {
            scope: MemberScope::Method,
            name: name.into(),
        }
    }

    /// Identity of a method built from its declaring type and simple name.
    pub fn method_of(type_name: &str, method: &str) -> Self {
        Self::method(format!("{}::{}", type_name, method))
    }

    /// The scope this id refers to.
    pub fn scope(&self) -> MemberScope {
        self.scope
    }

    /// The full name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The last path segment (method or type simple name).
    pub fn simple_name(&self) -> &str {
        self.name.rsplit("::").next().unwrap_or(&self.name)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Capability trait for enumerating the markers declared on a member.
///
/// `enumerate` is the cached population path; `is_defined` is the direct,
/// uncached presence check the resolver degrades to when population failed
/// for a member. The degraded path sacrifices inheritance-accurate results
/// and instance access, which callers must tolerate.
pub trait MetadataProvider: Send + Sync {
    /// Enumerate markers declared on `member` in declaration order,
    /// optionally including markers inherited from ancestor members.
    fn enumerate(
        &self,
        member: &MemberId,
        include_inherited: bool,
    ) -> Result<Vec<Arc<dyn Marker>>, MetadataError>;

    /// Direct presence check, bypassing any cache.
    fn is_defined(&self, member: &MemberId, marker_type: &str, include_inherited: bool) -> bool;

    /// The suite a type-scope member belongs to, if the provider knows it.
    ///
    /// Used for assembly-scope marker aggregation (categories). Providers
    /// that cannot answer may return None; aggregation then stops at class
    /// scope.
    fn owning_suite(&self, member: &MemberId) -> Option<MemberId>;
}
