//! Fixture registration table
//!
//! The registry is the precomputed-table implementation of
//! [`MetadataProvider`]: suites, fixture types, and methods are registered
//! in code together with their markers, constructor, optional context
//! setter, optional dispose handle, and base-fixture chain. Descriptor
//! construction resolves against this table; marker queries flow through
//! the cache/resolver like any other provider.
//!
//! Registration order is preserved everywhere it can be observed: markers
//! enumerate in declaration order, methods iterate in registration order.

use crate::descriptors::{ConstructorFn, ContextSetterFn, Instance, MethodFn, MethodReturn};
use crate::errors::MetadataError;
use crate::fault::{self, CompletionHandle};
use crate::markers::Marker;
use crate::metadata::{MemberId, MemberScope, MetadataProvider};
use indexmap::IndexMap;
use std::any::Any;
use std::sync::Arc;

/// One registered test method.
pub struct MethodSpec {
    name: Arc<str>,
    body: MethodFn,
    markers: Vec<Arc<dyn Marker>>,
}

impl MethodSpec {
    /// Start building a method registration.
    pub fn builder(name: impl Into<Arc<str>>) -> MethodSpecBuilder {
        MethodSpecBuilder {
            name: name.into(),
            body: None,
            markers: Vec::new(),
        }
    }

    /// Method simple name.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// The invocable body handle.
    pub fn body(&self) -> &MethodFn {
        &self.body
    }

    /// Markers declared on the method, in declaration order.
    pub fn markers(&self) -> &[Arc<dyn Marker>] {
        &self.markers
    }
}

/// Builder for [`MethodSpec`].
pub struct MethodSpecBuilder {
    name: Arc<str>,
    body: Option<MethodFn>,
    markers: Vec<Arc<dyn Marker>>,
}

impl MethodSpecBuilder {
    /// Register a synchronous body.
    pub fn body<T, F>(mut self, f: F) -> Self
    where
        T: Any + Send,
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.body = Some(adapt_body::<T, _>(move |target| {
            f(target);
            MethodReturn::Done
        }));
        self
    }

    /// Register a fallible body; an `Err` return is raised as a fault that
    /// preserves the error's type name and message.
    pub fn try_body<T, E, F>(mut self, f: F) -> Self
    where
        T: Any + Send,
        E: std::fmt::Display,
        F: Fn(&mut T) -> Result<(), E> + Send + Sync + 'static,
    {
        self.body = Some(adapt_body::<T, _>(move |target| {
            if let Err(error) = f(target) {
                fault::raise(error);
            }
            MethodReturn::Done
        }));
        self
    }

    /// Register an asynchronous body: the closure returns a completion
    /// handle the engine waits on before advancing.
    pub fn async_body<T, F>(mut self, f: F) -> Self
    where
        T: Any + Send,
        F: Fn(&mut T) -> CompletionHandle + Send + Sync + 'static,
    {
        self.body = Some(adapt_body::<T, _>(move |target| {
            MethodReturn::Pending(f(target))
        }));
        self
    }

    /// Attach a marker.
    pub fn marker(mut self, marker: impl Marker) -> Self {
        self.markers.push(Arc::new(marker));
        self
    }

    /// Finish the registration. A method without a body gets a no-op body;
    /// the descriptor layer decides whether that is acceptable for its role.
    pub fn build(self) -> MethodSpec {
        let body = self
            .body
            .unwrap_or_else(|| Arc::new(|_: &mut Instance| MethodReturn::Done));
        MethodSpec {
            name: self.name,
            body,
            markers: self.markers,
        }
    }
}

/// One registered fixture type.
pub struct FixtureSpec {
    type_name: Arc<str>,
    base: Option<Arc<str>>,
    constructor: Option<ConstructorFn>,
    context_setter: Option<ContextSetterFn>,
    has_context_slot: bool,
    dispose: Option<MethodFn>,
    markers: Vec<Arc<dyn Marker>>,
    methods: IndexMap<Arc<str>, MethodSpec>,
}

impl FixtureSpec {
    /// Start building a fixture registration.
    pub fn builder(type_name: impl Into<Arc<str>>) -> FixtureSpecBuilder {
        FixtureSpecBuilder {
            spec: FixtureSpec {
                type_name: type_name.into(),
                base: None,
                constructor: None,
                context_setter: None,
                has_context_slot: false,
                dispose: None,
                markers: Vec::new(),
                methods: IndexMap::new(),
            },
        }
    }

    /// Fully qualified fixture type name.
    pub fn type_name(&self) -> &Arc<str> {
        &self.type_name
    }

    /// Base fixture type, if the fixture inherits one.
    pub fn base(&self) -> Option<&Arc<str>> {
        self.base.as_ref()
    }

    /// Constructor handle, if registered.
    pub fn constructor(&self) -> Option<&ConstructorFn> {
        self.constructor.as_ref()
    }

    /// Whether the fixture declares a context-injection point at all.
    pub fn has_context_slot(&self) -> bool {
        self.has_context_slot
    }

    /// The context setter; a fixture may declare a slot without a setter.
    pub fn context_setter(&self) -> Option<&ContextSetterFn> {
        self.context_setter.as_ref()
    }

    /// Dispose handle, if the fixture exposes a disposal capability.
    pub fn dispose(&self) -> Option<&MethodFn> {
        self.dispose.as_ref()
    }

    /// Markers declared on the type, in declaration order.
    pub fn markers(&self) -> &[Arc<dyn Marker>] {
        &self.markers
    }

    /// Registered methods in registration order.
    pub fn methods(&self) -> impl Iterator<Item = &MethodSpec> {
        self.methods.values()
    }

    /// Look up one method by simple name.
    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.get(name)
    }
}

/// Builder for [`FixtureSpec`].
pub struct FixtureSpecBuilder {
    spec: FixtureSpec,
}

impl FixtureSpecBuilder {
    /// Register the constructor.
    pub fn constructor<T, F>(mut self, f: F) -> Self
    where
        T: Any + Send,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.spec.constructor = Some(Arc::new(move || Box::new(f()) as Instance));
        self
    }

    /// Declare the base fixture type.
    pub fn inherits(mut self, base: impl Into<Arc<str>>) -> Self {
        self.spec.base = Some(base.into());
        self
    }

    /// Declare a context slot with a setter.
    pub fn context_setter<T, F>(mut self, f: F) -> Self
    where
        T: Any + Send,
        F: Fn(&mut T, crate::context::TestContext) + Send + Sync + 'static,
    {
        let type_name = Arc::clone(&self.spec.type_name);
        self.spec.has_context_slot = true;
        self.spec.context_setter = Some(Arc::new(move |instance, ctx| {
            match instance.downcast_mut::<T>() {
                Some(target) => f(target, ctx),
                None => fixture_mismatch(&type_name),
            }
        }));
        self
    }

    /// Declare a context slot without a setter (valid; injection becomes a
    /// no-op rather than a fault).
    pub fn context_slot(mut self) -> Self {
        self.spec.has_context_slot = true;
        self
    }

    /// Register a dispose handle.
    pub fn dispose<T, F>(mut self, f: F) -> Self
    where
        T: Any + Send,
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.spec.dispose = Some(adapt_body::<T, _>(move |target| {
            f(target);
            MethodReturn::Done
        }));
        self
    }

    /// Attach a type-level marker.
    pub fn marker(mut self, marker: impl Marker) -> Self {
        self.spec.markers.push(Arc::new(marker));
        self
    }

    /// Register a method.
    pub fn method(mut self, method: MethodSpec) -> Self {
        self.spec.methods.insert(Arc::clone(&method.name), method);
        self
    }

    pub fn build(self) -> FixtureSpec {
        self.spec
    }
}

/// One registered suite (the assembly-level scope).
pub struct SuiteSpec {
    name: Arc<str>,
    markers: Vec<Arc<dyn Marker>>,
    fixtures: IndexMap<Arc<str>, FixtureSpec>,
}

impl SuiteSpec {
    /// Start building a suite registration.
    pub fn builder(name: impl Into<Arc<str>>) -> SuiteSpecBuilder {
        SuiteSpecBuilder {
            spec: SuiteSpec {
                name: name.into(),
                markers: Vec::new(),
                fixtures: IndexMap::new(),
            },
        }
    }

    /// Suite name.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Markers declared at suite scope.
    pub fn markers(&self) -> &[Arc<dyn Marker>] {
        &self.markers
    }

    /// Registered fixtures in registration order.
    pub fn fixtures(&self) -> impl Iterator<Item = &FixtureSpec> {
        self.fixtures.values()
    }
}

/// Builder for [`SuiteSpec`].
pub struct SuiteSpecBuilder {
    spec: SuiteSpec,
}

impl SuiteSpecBuilder {
    /// Attach a suite-level marker.
    pub fn marker(mut self, marker: impl Marker) -> Self {
        self.spec.markers.push(Arc::new(marker));
        self
    }

    /// Register a fixture.
    pub fn fixture(mut self, fixture: FixtureSpec) -> Self {
        self.spec
            .fixtures
            .insert(Arc::clone(&fixture.type_name), fixture);
        self
    }

    pub fn build(self) -> SuiteSpec {
        self.spec
    }
}

/// The registration table for a whole run.
#[derive(Default)]
pub struct Registry {
    suites: IndexMap<Arc<str>, SuiteSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            registry: Registry::new(),
        }
    }

    /// Registered suites in registration order.
    pub fn suites(&self) -> impl Iterator<Item = &SuiteSpec> {
        self.suites.values()
    }

    /// Find a fixture registration anywhere in the registry.
    pub fn fixture_spec(&self, type_name: &str) -> Option<&FixtureSpec> {
        self.suites
            .values()
            .find_map(|suite| suite.fixtures.get(type_name))
    }

    /// Name of the suite a fixture belongs to.
    pub fn suite_of(&self, type_name: &str) -> Option<&Arc<str>> {
        self.suites
            .values()
            .find(|suite| suite.fixtures.contains_key(type_name))
            .map(|suite| &suite.name)
    }

    fn split_method_name(name: &str) -> Option<(&str, &str)> {
        name.rsplit_once("::")
    }
}

/// Builder for [`Registry`].
pub struct RegistryBuilder {
    registry: Registry,
}

impl RegistryBuilder {
    /// Register a suite.
    pub fn suite(mut self, suite: SuiteSpec) -> Self {
        self.registry
            .suites
            .insert(Arc::clone(&suite.name), suite);
        self
    }

    pub fn build(self) -> Registry {
        self.registry
    }
}

impl MetadataProvider for Registry {
    fn enumerate(
        &self,
        member: &MemberId,
        include_inherited: bool,
    ) -> Result<Vec<Arc<dyn Marker>>, MetadataError> {
        match member.scope() {
            MemberScope::Suite => {
                let suite = self.suites.get(member.name()).ok_or_else(|| {
                    MetadataError::UnknownMember {
                        member: member.to_string(),
                    }
                })?;
                Ok(suite.markers.clone())
            }
            MemberScope::Type => {
                let spec =
                    self.fixture_spec(member.name())
                        .ok_or_else(|| MetadataError::UnknownMember {
                            member: member.to_string(),
                        })?;
                let mut markers = spec.markers.clone();
                if include_inherited {
                    let mut seen = vec![member.name().to_string()];
                    let mut base = spec.base.clone();
                    while let Some(base_name) = base {
                        if seen.contains(&base_name.to_string()) {
                            return Err(MetadataError::Inconsistent {
                                message: format!(
                                    "inheritance cycle through {} while enumerating {}",
                                    base_name, member
                                ),
                            });
                        }
                        seen.push(base_name.to_string());
                        let base_spec = self.fixture_spec(&base_name).ok_or_else(|| {
                            MetadataError::Inconsistent {
                                message: format!(
                                    "{} inherits unregistered type {}",
                                    member, base_name
                                ),
                            }
                        })?;
                        markers.extend(base_spec.markers.iter().cloned());
                        base = base_spec.base.clone();
                    }
                }
                Ok(markers)
            }
            MemberScope::Method => {
                let (type_name, method_name) = Registry::split_method_name(member.name())
                    .ok_or_else(|| MetadataError::UnknownMember {
                        member: member.to_string(),
                    })?;
                let spec =
                    self.fixture_spec(type_name)
                        .ok_or_else(|| MetadataError::UnknownMember {
                            member: member.to_string(),
                        })?;
                let method =
                    spec.method(method_name)
                        .ok_or_else(|| MetadataError::UnknownMember {
                            member: member.to_string(),
                        })?;
                Ok(method.markers.clone())
            }
        }
    }

    fn is_defined(&self, member: &MemberId, marker_type: &str, include_inherited: bool) -> bool {
        self.enumerate(member, include_inherited)
            .map(|markers| markers.iter().any(|m| m.derives_from(marker_type)))
            .unwrap_or(false)
    }

    fn owning_suite(&self, member: &MemberId) -> Option<MemberId> {
        match member.scope() {
            MemberScope::Suite => Some(member.clone()),
            MemberScope::Type => self
                .suite_of(member.name())
                .map(|name| MemberId::suite(Arc::clone(name))),
            MemberScope::Method => Registry::split_method_name(member.name())
                .and_then(|(type_name, _)| self.suite_of(type_name))
                .map(|name| MemberId::suite(Arc::clone(name))),
        }
    }
}

fn fixture_mismatch(type_name: &str) -> ! {
    fault::raise(format!(
        "registered handle does not match fixture type {}",
        type_name
    ))
}

/// Adapt a typed closure into an untyped method handle with a downcast
/// guard.
fn adapt_body<T, F>(f: F) -> MethodFn
where
    T: Any + Send,
    F: Fn(&mut T) -> MethodReturn + Send + Sync + 'static,
{
    Arc::new(move |instance: &mut Instance| match instance.downcast_mut::<T>() {
        Some(target) => f(target),
        None => fixture_mismatch(std::any::type_name::<T>()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::{
        CategoryMarker, CleanupMarker, InitializeMarker, TestMarker, TestSuiteMarker,
    };

    #[derive(Default)]
    struct Widget {
        count: u32,
    }

    #[derive(Default)]
    struct BaseWidget;

    fn registry() -> Registry {
        Registry::builder()
            .suite(
                SuiteSpec::builder("demo")
                    .marker(CategoryMarker::new(["suite-wide"]))
                    .fixture(
                        FixtureSpec::builder("demo::BaseWidget")
                            .marker(TestSuiteMarker)
                            .marker(CategoryMarker::new(["base"]))
                            .constructor(BaseWidget::default)
                            .build(),
                    )
                    .fixture(
                        FixtureSpec::builder("demo::Widget")
                            .marker(TestSuiteMarker)
                            .inherits("demo::BaseWidget")
                            .constructor(Widget::default)
                            .method(
                                MethodSpec::builder("build")
                                    .marker(TestMarker)
                                    .body(|w: &mut Widget| {
                                        w.count += 1;
                                    })
                                    .build(),
                            )
                            .method(
                                MethodSpec::builder("setup")
                                    .marker(InitializeMarker)
                                    .body(|_: &mut Widget| {})
                                    .build(),
                            )
                            .method(
                                MethodSpec::builder("teardown")
                                    .marker(CleanupMarker)
                                    .body(|_: &mut Widget| {})
                                    .build(),
                            )
                            .build(),
                    )
                    .build(),
            )
            .build()
    }

    #[test]
    fn test_enumerate_method_markers() {
        let registry = registry();
        let member = MemberId::method("demo::Widget::build");
        let markers = registry.enumerate(&member, false).unwrap();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].type_name(), "Test");
    }

    #[test]
    fn test_enumerate_type_markers_with_inheritance() {
        let registry = registry();
        let member = MemberId::fixture("demo::Widget");

        let own = registry.enumerate(&member, false).unwrap();
        assert_eq!(own.len(), 1);

        // Inherited view appends base markers after the derived type's own
        let inherited = registry.enumerate(&member, true).unwrap();
        let names: Vec<&str> = inherited.iter().map(|m| m.type_name()).collect();
        assert_eq!(names, vec!["TestSuite", "TestSuite", "Category"]);
    }

    #[test]
    fn test_enumerate_unknown_member_errors() {
        let registry = registry();
        let member = MemberId::method("demo::Ghost::run");
        assert!(matches!(
            registry.enumerate(&member, false),
            Err(MetadataError::UnknownMember { .. })
        ));
    }

    #[test]
    fn test_is_defined_answers_lineage() {
        let registry = registry();
        let member = MemberId::method("demo::Widget::build");
        assert!(registry.is_defined(&member, "Test", false));
        assert!(!registry.is_defined(&member, "Cleanup", false));
    }

    #[test]
    fn test_owning_suite_for_all_scopes() {
        let registry = registry();
        let suite = MemberId::suite("demo");
        assert_eq!(
            registry.owning_suite(&MemberId::fixture("demo::Widget")),
            Some(suite.clone())
        );
        assert_eq!(
            registry.owning_suite(&MemberId::method("demo::Widget::build")),
            Some(suite.clone())
        );
        assert_eq!(registry.owning_suite(&suite), Some(suite.clone()));
        assert_eq!(registry.owning_suite(&MemberId::fixture("demo::Ghost")), None);
    }

    #[test]
    fn test_inheritance_cycle_is_an_enumeration_error() {
        let registry = Registry::builder()
            .suite(
                SuiteSpec::builder("demo")
                    .fixture(
                        FixtureSpec::builder("demo::A")
                            .inherits("demo::B")
                            .constructor(Widget::default)
                            .build(),
                    )
                    .fixture(
                        FixtureSpec::builder("demo::B")
                            .inherits("demo::A")
                            .constructor(Widget::default)
                            .build(),
                    )
                    .build(),
            )
            .build();
        let member = MemberId::fixture("demo::A");
        assert!(matches!(
            registry.enumerate(&member, true),
            Err(MetadataError::Inconsistent { .. })
        ));
    }

    #[test]
    fn test_body_adapter_mismatch_is_a_fault() {
        let registry = registry();
        let spec = registry.fixture_spec("demo::Widget").expect("widget spec");
        let body = Arc::clone(spec.method("build").expect("build method").body());

        let mut wrong_instance: Instance = Box::new(BaseWidget);
        let fault = crate::fault::guarded(|| body(&mut wrong_instance)).unwrap_err();
        assert!(fault.message.contains("does not match fixture type"));
    }
}
