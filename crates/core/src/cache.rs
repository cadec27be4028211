//! Marker cache
//!
//! Per-member cache of resolved marker instances, lazily populated from a
//! [`MetadataProvider`] on first query and shared by every resolver and
//! descriptor builder in the process. Population happens under a single
//! write lock; populated entries are immutable `Arc`s, so readers of an
//! already-populated member never block each other.
//!
//! When enumeration fails for a member the failure is recorded as a
//! degraded entry: later queries for that member bypass the cache and go
//! straight to the provider's direct `is_defined` check. That path loses
//! inheritance-accurate results, which query callers must tolerate.

use crate::markers::Marker;
use crate::metadata::{MemberId, MetadataProvider};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Immutable, post-population marker set for one member.
#[derive(Debug)]
pub struct MemberMarkers {
    declared: Vec<Arc<dyn Marker>>,
    by_type: IndexMap<String, Vec<Arc<dyn Marker>>>,
}

impl MemberMarkers {
    fn build(markers: Vec<Arc<dyn Marker>>) -> Self {
        let mut by_type: IndexMap<String, Vec<Arc<dyn Marker>>> = IndexMap::new();
        for marker in &markers {
            by_type
                .entry(marker.type_name().to_string())
                .or_default()
                .push(Arc::clone(marker));
        }
        Self {
            declared: markers,
            by_type,
        }
    }

    /// All markers on the member, in declaration order.
    pub fn declared(&self) -> &[Arc<dyn Marker>] {
        &self.declared
    }

    /// Markers of one exact type, in declaration order.
    ///
    /// For a well-formed single-use marker the slice has at most one
    /// element; the single-valued resolver path surfaces longer slices as
    /// contract violations instead of picking silently.
    pub fn of_type(&self, marker_type: &str) -> &[Arc<dyn Marker>] {
        self.by_type
            .get(marker_type)
            .map(|markers| markers.as_slice())
            .unwrap_or(&[])
    }
}

/// One cached member entry: either a populated marker set or a record that
/// population failed and queries must degrade to direct provider checks.
#[derive(Debug)]
pub enum CacheEntry {
    Populated(MemberMarkers),
    Degraded,
}

/// Cache statistics for monitoring and debugging
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub degraded_members: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

/// Process-lifetime cache of marker sets, keyed by member identity and the
/// inherited-inclusion flag (the two views of one member are distinct
/// entries).
#[derive(Debug, Default)]
pub struct MarkerCache {
    entries: RwLock<HashMap<(MemberId, bool), Arc<CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    degraded: AtomicU64,
}

impl MarkerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry for a member, populating it from `provider` on first
    /// query.
    pub fn entry(
        &self,
        provider: &dyn MetadataProvider,
        member: &MemberId,
        include_inherited: bool,
    ) -> Arc<CacheEntry> {
        let key = (member.clone(), include_inherited);
        if let Ok(entries) = self.entries.read() {
            if let Some(entry) = entries.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Arc::clone(entry);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Another thread may have populated while we waited for the lock.
        if let Some(entry) = entries.get(&key) {
            return Arc::clone(entry);
        }

        let entry = match provider.enumerate(member, include_inherited) {
            Ok(markers) => {
                debug!(
                    member = %member,
                    include_inherited,
                    marker_count = markers.len(),
                    "Populated marker cache entry"
                );
                Arc::new(CacheEntry::Populated(MemberMarkers::build(markers)))
            }
            Err(e) => {
                warn!(
                    member = %member,
                    include_inherited,
                    "Marker enumeration failed, degrading to direct metadata checks: {}",
                    e
                );
                self.degraded.fetch_add(1, Ordering::Relaxed);
                Arc::new(CacheEntry::Degraded)
            }
        };
        entries.insert(key, Arc::clone(&entry));
        entry
    }

    /// Drop every cached entry. Test-isolation scenarios only; normal runs
    /// keep entries for the process lifetime.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Snapshot of cache statistics.
    pub fn stats(&self) -> CacheStats {
        let entries = self
            .entries
            .read()
            .map(|entries| entries.len())
            .unwrap_or(0);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            degraded_members: self.degraded.load(Ordering::Relaxed),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MetadataError;
    use crate::markers::{CategoryMarker, TestMarker, TimeoutMarker};
    use std::sync::atomic::AtomicUsize;

    /// Provider that counts enumerations and can be told to fail.
    struct CountingProvider {
        calls: AtomicUsize,
        fail_for: Option<MemberId>,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_for: None,
            }
        }

        fn failing_for(member: MemberId) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_for: Some(member),
            }
        }
    }

    impl MetadataProvider for CountingProvider {
        fn enumerate(
            &self,
            member: &MemberId,
            _include_inherited: bool,
        ) -> Result<Vec<Arc<dyn Marker>>, MetadataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_for.as_ref() == Some(member) {
                return Err(MetadataError::Materialization {
                    member: member.to_string(),
                    marker_type: "Timeout".to_string(),
                    message: "poisoned".to_string(),
                });
            }
            Ok(vec![
                Arc::new(TestMarker),
                Arc::new(CategoryMarker::new(["fast"])),
                Arc::new(CategoryMarker::new(["nightly"])),
                Arc::new(TimeoutMarker::from_millis(100)),
            ])
        }

        fn is_defined(
            &self,
            _member: &MemberId,
            marker_type: &str,
            _include_inherited: bool,
        ) -> bool {
            marker_type == "Test"
        }

        fn owning_suite(&self, _member: &MemberId) -> Option<MemberId> {
            None
        }
    }

    #[test]
    fn test_population_happens_once_per_member() {
        let cache = MarkerCache::new();
        let provider = CountingProvider::new();
        let member = MemberId::method("demo::Counter::increment");

        let first = cache.entry(&provider, &member, true);
        let second = cache.entry(&provider, &member, true);
        assert!(matches!(*first, CacheEntry::Populated(_)));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_inherited_flag_is_a_distinct_entry() {
        let cache = MarkerCache::new();
        let provider = CountingProvider::new();
        let member = MemberId::fixture("demo::Counter");

        cache.entry(&provider, &member, false);
        cache.entry(&provider, &member, true);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().entries, 2);
    }

    #[test]
    fn test_declaration_order_preserved() {
        let cache = MarkerCache::new();
        let provider = CountingProvider::new();
        let member = MemberId::method("demo::Counter::increment");

        let entry = cache.entry(&provider, &member, true);
        let CacheEntry::Populated(markers) = &*entry else {
            panic!("expected populated entry");
        };
        let names: Vec<&str> = markers.declared().iter().map(|m| m.type_name()).collect();
        assert_eq!(names, vec!["Test", "Category", "Category", "Timeout"]);
        assert_eq!(markers.of_type("Category").len(), 2);
        assert!(markers.of_type("Cleanup").is_empty());
    }

    #[test]
    fn test_enumeration_failure_degrades() {
        let member = MemberId::fixture("demo::Broken");
        let cache = MarkerCache::new();
        let provider = CountingProvider::failing_for(member.clone());

        let entry = cache.entry(&provider, &member, true);
        assert!(matches!(*entry, CacheEntry::Degraded));
        // The degraded record itself is cached; enumeration is not retried.
        let again = cache.entry(&provider, &member, true);
        assert!(matches!(*again, CacheEntry::Degraded));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().degraded_members, 1);
    }

    #[test]
    fn test_clear_forces_repopulation() {
        let cache = MarkerCache::new();
        let provider = CountingProvider::new();
        let member = MemberId::method("demo::Counter::increment");

        cache.entry(&provider, &member, true);
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
        cache.entry(&provider, &member, true);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 7,
            misses: 3,
            degraded_members: 0,
            entries: 3,
        };
        assert_eq!(stats.hit_rate(), 0.7);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
