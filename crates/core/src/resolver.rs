//! Marker resolution
//!
//! Stateless query layer over the [`MarkerCache`]: presence checks,
//! derived-from scans, single-instance typed access, and the fixed-order
//! scope aggregation used for categories. Descriptor construction and the
//! invoker both query through this type; it is cheap to clone and every
//! clone shares the same cache.

use crate::cache::{CacheEntry, MarkerCache};
use crate::errors::ResolverError;
use crate::markers::{self, CategoryMarker, IgnoreMarker, Marker, PriorityMarker, TimeoutMarker};
use crate::metadata::{MemberId, MetadataProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Query layer over cached marker metadata.
#[derive(Clone)]
pub struct MarkerResolver {
    provider: Arc<dyn MetadataProvider>,
    cache: Arc<MarkerCache>,
}

impl MarkerResolver {
    /// Create a resolver with a fresh cache.
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self::with_cache(provider, Arc::new(MarkerCache::new()))
    }

    /// Create a resolver sharing an existing cache.
    pub fn with_cache(provider: Arc<dyn MetadataProvider>, cache: Arc<MarkerCache>) -> Self {
        Self { provider, cache }
    }

    /// The shared marker cache (stats, test-isolation clear).
    pub fn cache(&self) -> &MarkerCache {
        &self.cache
    }

    /// Whether a marker of exactly `marker_type` is present on `member`.
    ///
    /// Never fails for a missing marker; a member whose cache entry is
    /// degraded answers through the provider's direct check instead.
    pub fn has_marker(&self, member: &MemberId, marker_type: &str, include_inherited: bool) -> bool {
        match &*self.cache.entry(self.provider.as_ref(), member, include_inherited) {
            CacheEntry::Populated(markers) => !markers.of_type(marker_type).is_empty(),
            CacheEntry::Degraded => {
                self.provider
                    .is_defined(member, marker_type, include_inherited)
            }
        }
    }

    /// Whether a marker whose lineage contains `base_marker_type` is present,
    /// and the first matching instance in declaration order.
    ///
    /// On the degraded path only presence can be answered; the instance is
    /// None even when the first element is true.
    pub fn has_marker_derived_from(
        &self,
        member: &MemberId,
        base_marker_type: &str,
        include_inherited: bool,
    ) -> (bool, Option<Arc<dyn Marker>>) {
        match &*self.cache.entry(self.provider.as_ref(), member, include_inherited) {
            CacheEntry::Populated(markers) => {
                let matched = markers
                    .declared()
                    .iter()
                    .find(|marker| marker.derives_from(base_marker_type))
                    .cloned();
                (matched.is_some(), matched)
            }
            CacheEntry::Degraded => (
                self.provider
                    .is_defined(member, base_marker_type, include_inherited),
                None,
            ),
        }
    }

    /// All instances of one marker type on a member, in declaration order.
    ///
    /// This is the multi-valued path aggregation callers must use for
    /// markers that allow multiple instances.
    pub fn markers_of_type(
        &self,
        member: &MemberId,
        marker_type: &str,
        include_inherited: bool,
    ) -> Vec<Arc<dyn Marker>> {
        match &*self.cache.entry(self.provider.as_ref(), member, include_inherited) {
            CacheEntry::Populated(markers) => markers.of_type(marker_type).to_vec(),
            CacheEntry::Degraded => Vec::new(),
        }
    }

    /// The single instance of a single-use marker on a member.
    ///
    /// More than one instance is a registration contract violation and is
    /// surfaced as an error, never resolved by picking one. A degraded
    /// member answers None: the direct check cannot materialize instances.
    pub fn get_single<T: Marker + Clone>(
        &self,
        member: &MemberId,
        marker_type: &str,
    ) -> Result<Option<T>, ResolverError> {
        match &*self.cache.entry(self.provider.as_ref(), member, false) {
            CacheEntry::Populated(markers) => {
                let instances = markers.of_type(marker_type);
                match instances {
                    [] => Ok(None),
                    [only] => Ok(only.as_any().downcast_ref::<T>().cloned()),
                    _ => Err(ResolverError::MultipleMarkers {
                        member: member.to_string(),
                        marker_type: marker_type.to_string(),
                        count: instances.len(),
                    }),
                }
            }
            CacheEntry::Degraded => {
                warn!(
                    member = %member,
                    marker_type,
                    "Single-marker lookup on degraded member answers None"
                );
                Ok(None)
            }
        }
    }

    /// Categories aggregated across method, class, and suite scope.
    ///
    /// The order is load-bearing: method-level categories first (declaration
    /// order), then class-level, then suite-level; multiple marker instances
    /// at one scope concatenate in declaration order. Category-based test
    /// filtering depends on method-level categories sorting first.
    pub fn categories(&self, method: &MemberId, declaring_type: &MemberId) -> Vec<String> {
        let mut collected = Vec::new();
        self.collect_categories(method, false, &mut collected);
        self.collect_categories(declaring_type, true, &mut collected);
        if let Some(suite) = self.provider.owning_suite(declaring_type) {
            self.collect_categories(&suite, false, &mut collected);
        }
        collected
    }

    fn collect_categories(&self, member: &MemberId, include_inherited: bool, out: &mut Vec<String>) {
        for marker in self.markers_of_type(member, markers::names::CATEGORY, include_inherited) {
            if let Some(category) = marker.as_any().downcast_ref::<CategoryMarker>() {
                out.extend(category.categories.iter().cloned());
            }
        }
    }

    /// Declared test-body timeout for a method, if any.
    pub fn timeout_of(&self, method: &MemberId) -> Result<Option<Duration>, ResolverError> {
        Ok(self
            .get_single::<TimeoutMarker>(method, markers::names::TIMEOUT)?
            .map(|marker| marker.limit))
    }

    /// Declared priority, method scope winning over class scope.
    pub fn priority_of(
        &self,
        method: &MemberId,
        declaring_type: &MemberId,
    ) -> Result<Option<i32>, ResolverError> {
        if let Some(marker) = self.get_single::<PriorityMarker>(method, markers::names::PRIORITY)? {
            return Ok(Some(marker.value));
        }
        Ok(self
            .get_single::<PriorityMarker>(declaring_type, markers::names::PRIORITY)?
            .map(|marker| marker.value))
    }

    /// The ignore marker in effect for a method, method scope winning over
    /// class scope.
    pub fn ignored(&self, method: &MemberId, declaring_type: &MemberId) -> Option<IgnoreMarker> {
        self.get_single::<IgnoreMarker>(method, markers::names::IGNORE)
            .ok()
            .flatten()
            .or_else(|| {
                self.get_single::<IgnoreMarker>(declaring_type, markers::names::IGNORE)
                    .ok()
                    .flatten()
            })
    }
}

impl std::fmt::Debug for MarkerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkerResolver")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
