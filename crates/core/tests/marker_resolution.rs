//! Integration tests for marker resolution over the registration table
//!
//! Covers the scope-aggregation order for categories, derived-marker
//! queries end to end, cache population and isolation, and the degraded
//! fallback path when a provider cannot enumerate a member.

use proctor_core::cache::MarkerCache;
use proctor_core::descriptors::{FixtureDescriptor, MethodDescriptor};
use proctor_core::errors::MetadataError;
use proctor_core::markers::{
    CategoryMarker, DataTestMarker, Marker, TestMarker, TestSuiteMarker,
};
use proctor_core::metadata::{MemberId, MetadataProvider};
use proctor_core::registry::{FixtureSpec, MethodSpec, Registry, SuiteSpec};
use proctor_core::resolver::MarkerResolver;
use std::sync::Arc;

fn categorized_registry() -> Registry {
    Registry::builder()
        .suite(
            SuiteSpec::builder("demo")
                .marker(CategoryMarker::new(["assembly-scope"]))
                .fixture(
                    FixtureSpec::builder("demo::Widget")
                        .marker(TestSuiteMarker)
                        .marker(CategoryMarker::new(["class-scope"]))
                        .constructor(|| 0u32)
                        .method(
                            MethodSpec::builder("build")
                                .marker(TestMarker)
                                .marker(CategoryMarker::new(["method-first"]))
                                .marker(CategoryMarker::new(["method-second", "method-third"]))
                                .body(|_: &mut u32| {})
                                .build(),
                        )
                        .method(
                            MethodSpec::builder("rows")
                                .marker(DataTestMarker)
                                .body(|_: &mut u32| {})
                                .build(),
                        )
                        .build(),
                )
                .build(),
        )
        .build()
}

fn resolver_over(registry: Registry) -> (Arc<Registry>, MarkerResolver) {
    let registry = Arc::new(registry);
    let resolver = MarkerResolver::new(Arc::clone(&registry) as Arc<dyn MetadataProvider>);
    (registry, resolver)
}

#[test]
fn test_categories_aggregate_method_then_class_then_suite() {
    let (_registry, resolver) = resolver_over(categorized_registry());
    let method = MemberId::method("demo::Widget::build");
    let fixture = MemberId::fixture("demo::Widget");

    // Method-level first (declaration order, same-scope instances
    // concatenated), then class, then assembly scope.
    assert_eq!(
        resolver.categories(&method, &fixture),
        vec![
            "method-first",
            "method-second",
            "method-third",
            "class-scope",
            "assembly-scope"
        ]
    );
}

#[test]
fn test_derived_test_marker_resolves_as_a_test() {
    let (registry, resolver) = resolver_over(categorized_registry());
    let fixture = FixtureDescriptor::resolve(&registry, &resolver, "demo::Widget").unwrap();

    // A DataTest-marked method is accepted by the descriptor layer through
    // the derived-from query.
    let method = MethodDescriptor::resolve(&registry, &resolver, fixture, "rows").unwrap();
    assert_eq!(method.name(), "rows");

    let member = MemberId::method("demo::Widget::rows");
    let (present, instance) = resolver.has_marker_derived_from(&member, "Test", false);
    assert!(present);
    assert_eq!(instance.expect("matched").type_name(), "DataTest");
    // Exact-type query does not see the derived marker.
    assert!(!resolver.has_marker(&member, "Test", false));
}

#[test]
fn test_shared_cache_is_populated_once_across_resolvers() {
    let registry = Arc::new(categorized_registry());
    let cache = Arc::new(MarkerCache::new());
    let resolver_a = MarkerResolver::with_cache(
        Arc::clone(&registry) as Arc<dyn MetadataProvider>,
        Arc::clone(&cache),
    );
    let resolver_b = MarkerResolver::with_cache(
        Arc::clone(&registry) as Arc<dyn MetadataProvider>,
        Arc::clone(&cache),
    );
    let member = MemberId::method("demo::Widget::build");

    assert!(resolver_a.has_marker(&member, "Test", false));
    assert!(resolver_b.has_marker(&member, "Test", false));

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
}

#[test]
fn test_cache_clear_isolates_runs() {
    let (_registry, resolver) = resolver_over(categorized_registry());
    let member = MemberId::method("demo::Widget::build");

    assert!(resolver.has_marker(&member, "Test", false));
    assert_eq!(resolver.cache().stats().entries, 1);
    resolver.cache().clear();
    assert_eq!(resolver.cache().stats().entries, 0);
    // Still answers correctly after the clear, repopulating lazily.
    assert!(resolver.has_marker(&member, "Test", false));
}

/// Provider whose enumeration always fails but whose direct check works:
/// the shape of a member with unloadable marker instances.
struct UnloadableProvider;

impl MetadataProvider for UnloadableProvider {
    fn enumerate(
        &self,
        member: &MemberId,
        _include_inherited: bool,
    ) -> Result<Vec<Arc<dyn Marker>>, MetadataError> {
        Err(MetadataError::Materialization {
            member: member.to_string(),
            marker_type: "Test".to_string(),
            message: "marker type failed to load".to_string(),
        })
    }

    fn is_defined(&self, _member: &MemberId, marker_type: &str, _inherited: bool) -> bool {
        marker_type == "Test"
    }

    fn owning_suite(&self, _member: &MemberId) -> Option<MemberId> {
        None
    }
}

#[test]
fn test_degraded_member_still_answers_presence() {
    proctor_core::logging::init(None).ok();
    let resolver = MarkerResolver::new(Arc::new(UnloadableProvider));
    let member = MemberId::method("demo::Broken::run");

    assert!(resolver.has_marker(&member, "Test", true));
    assert!(!resolver.has_marker(&member, "Cleanup", true));

    // Aggregation degrades to empty rather than failing the caller.
    let fixture = MemberId::fixture("demo::Broken");
    assert!(resolver.categories(&member, &fixture).is_empty());
    assert!(resolver.cache().stats().degraded_members > 0);
}
