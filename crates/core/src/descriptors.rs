//! Lifecycle descriptors
//!
//! Load-time-resolved descriptions of test fixtures and methods. A
//! [`FixtureDescriptor`] is built once per test class and shared read-only
//! by every invocation of that class's methods; a [`MethodDescriptor`] is
//! built per registered test method and reused across repeated invocations.
//! The fixture *instance* is never reused: each invocation constructs its
//! own through the constructor handle.
//!
//! The inherited initialize/cleanup queues are flat, position-indexed
//! sequences precomputed here by walking the base-fixture chain, so the
//! invoker never re-walks inheritance at run time.

use crate::context::TestContext;
use crate::errors::DescriptorError;
use crate::fault::CompletionHandle;
use crate::markers::names;
use crate::metadata::MemberId;
use crate::registry::{FixtureSpec, Registry};
use crate::resolver::MarkerResolver;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A live fixture instance, owned by exactly one invocation.
pub type Instance = Box<dyn Any + Send>;

/// Constructor handle producing a fresh instance.
pub type ConstructorFn = Arc<dyn Fn() -> Instance + Send + Sync>;

/// Invocable method handle (test body, lifecycle method, dispose).
pub type MethodFn = Arc<dyn Fn(&mut Instance) -> MethodReturn + Send + Sync>;

/// Context-injection handle.
pub type ContextSetterFn = Arc<dyn Fn(&mut Instance, TestContext) + Send + Sync>;

/// What a method handle returns when invoked.
#[derive(Debug)]
pub enum MethodReturn {
    /// Completed synchronously.
    Done,
    /// Started asynchronous work; the engine waits on the handle before
    /// advancing.
    Pending(CompletionHandle),
}

/// An invocable lifecycle member (initialize or cleanup) with its identity.
#[derive(Clone)]
pub struct LifecycleMethod {
    name: Arc<str>,
    member: MemberId,
    body: MethodFn,
}

impl LifecycleMethod {
    /// Method simple name, used in failure messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full member identity.
    pub fn member(&self) -> &MemberId {
        &self.member
    }

    /// The invocable handle.
    pub fn body(&self) -> &MethodFn {
        &self.body
    }
}

impl std::fmt::Debug for LifecycleMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleMethod")
            .field("member", &self.member)
            .finish_non_exhaustive()
    }
}

/// Context-injection point. Present-without-setter is a valid shape: the
/// injection phase becomes a no-op instead of a fault.
#[derive(Clone, Default)]
pub struct ContextSlot {
    setter: Option<ContextSetterFn>,
}

impl ContextSlot {
    /// The setter, when one was registered.
    pub fn setter(&self) -> Option<&ContextSetterFn> {
        self.setter.as_ref()
    }
}

/// Suite-level descriptor (the assembly scope).
#[derive(Debug, Clone)]
pub struct SuiteDescriptor {
    name: Arc<str>,
    member: MemberId,
}

impl SuiteDescriptor {
    /// Suite name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Suite member identity.
    pub fn member(&self) -> &MemberId {
        &self.member
    }
}

/// Load-time description of a test fixture's lifecycle members.
///
/// Built once per class, read-only afterwards, freely shared across
/// concurrent invocations of the class's methods.
pub struct FixtureDescriptor {
    type_name: Arc<str>,
    member: MemberId,
    constructor: ConstructorFn,
    context_slot: Option<ContextSlot>,
    own_initialize: Option<LifecycleMethod>,
    own_cleanup: Option<LifecycleMethod>,
    inherited_initialize: Vec<Option<LifecycleMethod>>,
    inherited_cleanup: Vec<Option<LifecycleMethod>>,
    dispose: Option<MethodFn>,
    suite: Arc<SuiteDescriptor>,
}

impl FixtureDescriptor {
    /// Resolve a fixture registration into its descriptor.
    ///
    /// Finds the constructor, context slot, own and inherited lifecycle
    /// members through marker resolution, and precomputes the two
    /// inherited-method queues: initialize in base-to-derived order,
    /// cleanup in derived-to-base order. Each queue level without a method
    /// holds a placeholder entry.
    pub fn resolve(
        registry: &Registry,
        resolver: &MarkerResolver,
        type_name: &str,
    ) -> Result<Arc<Self>, DescriptorError> {
        let spec = registry
            .fixture_spec(type_name)
            .ok_or_else(|| DescriptorError::UnknownFixture {
                type_name: type_name.to_string(),
            })?;
        let member = MemberId::fixture(Arc::clone(spec.type_name()));
        if !resolver.has_marker(&member, names::TEST_SUITE, true) {
            return Err(DescriptorError::NotATestFixture {
                type_name: type_name.to_string(),
            });
        }
        let constructor = spec
            .constructor()
            .cloned()
            .ok_or_else(|| DescriptorError::MissingConstructor {
                type_name: type_name.to_string(),
            })?;

        let own_initialize = find_lifecycle_method(spec, resolver, names::INITIALIZE)?;
        let own_cleanup = find_lifecycle_method(spec, resolver, names::CLEANUP)?;

        // Walk the base chain once, nearest base first. The initialize queue
        // wants base-to-derived order, so it is reversed after the walk; the
        // cleanup queue wants derived-to-base order, which is walk order.
        let mut initialize_levels: Vec<Option<LifecycleMethod>> = Vec::new();
        let mut cleanup_levels: Vec<Option<LifecycleMethod>> = Vec::new();
        let mut visited = vec![spec.type_name().to_string()];
        let mut base = spec.base().cloned();
        while let Some(base_name) = base {
            if visited.contains(&base_name.to_string()) {
                return Err(DescriptorError::InheritanceCycle {
                    type_name: type_name.to_string(),
                });
            }
            visited.push(base_name.to_string());
            let base_spec = registry.fixture_spec(&base_name).ok_or_else(|| {
                DescriptorError::UnknownBase {
                    type_name: type_name.to_string(),
                    base: base_name.to_string(),
                }
            })?;
            initialize_levels.push(find_lifecycle_method(base_spec, resolver, names::INITIALIZE)?);
            cleanup_levels.push(find_lifecycle_method(base_spec, resolver, names::CLEANUP)?);
            base = base_spec.base().cloned();
        }
        initialize_levels.reverse();

        let context_slot = if spec.has_context_slot() {
            Some(ContextSlot {
                setter: spec.context_setter().cloned(),
            })
        } else {
            None
        };

        let suite_name = registry
            .suite_of(spec.type_name())
            .cloned()
            .unwrap_or_else(|| Arc::from("<unknown-suite>"));
        let suite = Arc::new(SuiteDescriptor {
            member: MemberId::suite(Arc::clone(&suite_name)),
            name: suite_name,
        });

        debug!(
            fixture = %spec.type_name(),
            inherited_levels = initialize_levels.len(),
            "Resolved fixture descriptor"
        );

        Ok(Arc::new(Self {
            type_name: Arc::clone(spec.type_name()),
            member,
            constructor,
            context_slot,
            own_initialize,
            own_cleanup,
            inherited_initialize: initialize_levels,
            inherited_cleanup: cleanup_levels,
            dispose: spec.dispose().cloned(),
            suite,
        }))
    }

    /// Fully qualified fixture type name.
    pub fn type_name(&self) -> &Arc<str> {
        &self.type_name
    }

    /// Fixture member identity.
    pub fn member(&self) -> &MemberId {
        &self.member
    }

    /// Constructor handle.
    pub fn constructor(&self) -> &ConstructorFn {
        &self.constructor
    }

    /// Context-injection point, when the fixture declares one.
    pub fn context_slot(&self) -> Option<&ContextSlot> {
        self.context_slot.as_ref()
    }

    /// The fixture's own initialize method.
    pub fn own_initialize(&self) -> Option<&LifecycleMethod> {
        self.own_initialize.as_ref()
    }

    /// The fixture's own cleanup method.
    pub fn own_cleanup(&self) -> Option<&LifecycleMethod> {
        self.own_cleanup.as_ref()
    }

    /// Inherited initialize queue, base-to-derived, with placeholders.
    pub fn inherited_initialize(&self) -> &[Option<LifecycleMethod>] {
        &self.inherited_initialize
    }

    /// Inherited cleanup queue, derived-to-base, with placeholders.
    pub fn inherited_cleanup(&self) -> &[Option<LifecycleMethod>] {
        &self.inherited_cleanup
    }

    /// Dispose handle, when the fixture exposes one.
    pub fn dispose(&self) -> Option<&MethodFn> {
        self.dispose.as_ref()
    }

    /// Owning suite descriptor.
    pub fn suite(&self) -> &Arc<SuiteDescriptor> {
        &self.suite
    }

    /// Initialize execution order: inherited entries base-to-derived, then
    /// the fixture's own method. Placeholder levels are skipped.
    pub fn initialize_sequence(&self) -> impl Iterator<Item = &LifecycleMethod> {
        self.inherited_initialize
            .iter()
            .filter_map(|entry| entry.as_ref())
            .chain(self.own_initialize.as_ref())
    }

    /// Cleanup execution order: the fixture's own method first, then
    /// inherited entries derived-to-base. Placeholder levels are skipped.
    pub fn cleanup_sequence(&self) -> impl Iterator<Item = &LifecycleMethod> {
        self.own_cleanup.as_ref().into_iter().chain(
            self.inherited_cleanup
                .iter()
                .filter_map(|entry| entry.as_ref()),
        )
    }
}

impl std::fmt::Debug for FixtureDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureDescriptor")
            .field("type_name", &self.type_name)
            .field("own_initialize", &self.own_initialize)
            .field("own_cleanup", &self.own_cleanup)
            .field("inherited_levels", &self.inherited_initialize.len())
            .finish_non_exhaustive()
    }
}

fn find_lifecycle_method(
    spec: &FixtureSpec,
    resolver: &MarkerResolver,
    marker_type: &str,
) -> Result<Option<LifecycleMethod>, DescriptorError> {
    let mut found: Option<LifecycleMethod> = None;
    for method in spec.methods() {
        let member = MemberId::method_of(spec.type_name(), method.name());
        if !resolver.has_marker(&member, marker_type, false) {
            continue;
        }
        if let Some(existing) = &found {
            return Err(DescriptorError::DuplicateLifecycleMethod {
                type_name: spec.type_name().to_string(),
                marker_type: marker_type.to_string(),
                first: existing.name.to_string(),
                second: method.name().to_string(),
            });
        }
        found = Some(LifecycleMethod {
            name: Arc::clone(method.name()),
            member,
            body: Arc::clone(method.body()),
        });
    }
    Ok(found)
}

/// Load-time description of one test method.
pub struct MethodDescriptor {
    name: Arc<str>,
    member: MemberId,
    body: MethodFn,
    declared_timeout: Option<Duration>,
    priority: Option<i32>,
    fixture: Arc<FixtureDescriptor>,
    not_runnable: Option<String>,
}

impl MethodDescriptor {
    /// Resolve a method registration into its descriptor.
    ///
    /// The method must carry a test marker (or one derived from it).
    /// Registration contract violations that only matter at run time (a
    /// duplicated single-use timeout/priority marker) do not fail
    /// resolution; they mark the descriptor not-runnable so the invocation
    /// reports the defect as a NotRunnable outcome.
    pub fn resolve(
        registry: &Registry,
        resolver: &MarkerResolver,
        fixture: Arc<FixtureDescriptor>,
        method_name: &str,
    ) -> Result<Arc<Self>, DescriptorError> {
        let spec = registry
            .fixture_spec(fixture.type_name())
            .ok_or_else(|| DescriptorError::UnknownFixture {
                type_name: fixture.type_name().to_string(),
            })?;
        let method = spec
            .method(method_name)
            .ok_or_else(|| DescriptorError::UnknownMethod {
                type_name: fixture.type_name().to_string(),
                method: method_name.to_string(),
            })?;
        let member = MemberId::method_of(fixture.type_name(), method_name);
        let (is_test, _) = resolver.has_marker_derived_from(&member, names::TEST, false);
        if !is_test {
            return Err(DescriptorError::NotATestMethod {
                type_name: fixture.type_name().to_string(),
                method: method_name.to_string(),
            });
        }

        let mut not_runnable = None;
        let declared_timeout = match resolver.timeout_of(&member) {
            Ok(timeout) => timeout,
            Err(e) => {
                not_runnable = Some(e.to_string());
                None
            }
        };
        let priority = match resolver.priority_of(&member, fixture.member()) {
            Ok(priority) => priority,
            Err(e) => {
                if not_runnable.is_none() {
                    not_runnable = Some(e.to_string());
                }
                None
            }
        };

        Ok(Arc::new(Self {
            name: Arc::clone(method.name()),
            member,
            body: Arc::clone(method.body()),
            declared_timeout,
            priority,
            fixture,
            not_runnable,
        }))
    }

    /// Method simple name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full member identity.
    pub fn member(&self) -> &MemberId {
        &self.member
    }

    /// The test body handle.
    pub fn body(&self) -> &MethodFn {
        &self.body
    }

    /// Timeout declared on the method, if any.
    pub fn declared_timeout(&self) -> Option<Duration> {
        self.declared_timeout
    }

    /// Declared priority, method scope winning over class scope.
    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    /// Owning fixture descriptor.
    pub fn fixture(&self) -> &Arc<FixtureDescriptor> {
        &self.fixture
    }

    /// Why the method cannot run, when registration is defective.
    pub fn not_runnable(&self) -> Option<&str> {
        self.not_runnable.as_deref()
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("member", &self.member)
            .field("declared_timeout", &self.declared_timeout)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
