//! The lifecycle invoker
//!
//! Runs one test method through the six-phase sequence: Construct,
//! SetContext, InitializeChain, TestBody, CleanupChain, Dispose. Each phase
//! returns a tagged result; the driver pattern-matches instead of letting
//! faults unwind, so a failure in one phase never suppresses a later phase
//! that must still run. Every fault is folded into the returned
//! [`TestResult`] — the invoker does not panic or error out of `invoke`
//! under normal operation.
//!
//! Phase skip rules on failure:
//!
//! | failing phase | initialize | test body | cleanup | dispose |
//! |---------------|-----------|-----------|---------|---------|
//! | Construct     | skipped   | skipped   | skipped | skipped (no instance) |
//! | SetContext    | skipped   | skipped   | skipped | runs    |
//! | Initialize    | stopped   | skipped   | runs    | runs    |
//! | TestBody      | —         | —         | runs    | runs    |
//! | Cleanup       | —         | —         | continues | runs  |
//!
//! A finite timeout races the test body on a dedicated worker thread that
//! owns the instance for the duration of the phase. When the clock wins,
//! the invoker returns promptly with a Timeout outcome and the abandoned
//! worker finalizes the instance (cleanup, dispose) on its own, best
//! effort, when the body eventually returns. Cancellation is cooperative;
//! the engine never hard-kills the body.

use crate::context::{TestContext, TestIdentity};
use crate::descriptors::{
    FixtureDescriptor, Instance, MethodDescriptor, MethodFn, MethodReturn,
};
use crate::fault::{self, Fault, FaultKind};
use crate::outcome::{Failure, Outcome, OutcomeRecorder, TestResult};
use crate::resolver::MarkerResolver;
use chrono::Utc;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// How one test body invocation resolved.
enum BodyVerdict {
    Passed,
    Faulted(Fault),
}

/// Outcome of the test-body phase, including instance custody.
enum BodyPhase {
    /// The body finished (pass or fault) and the instance came back.
    Completed(Instance, BodyVerdict),
    /// The clock won; the worker keeps the instance and finalizes it.
    Abandoned(Duration),
    /// The worker thread could not be spawned; the instance is lost.
    SpawnFailed(Fault),
}

/// Per-test-method execution engine.
///
/// Holds the resolved descriptors and the run-wide default timeout;
/// stateless between invocations. Each [`Invoker::invoke`] call constructs
/// its own fixture instance, so repeated invocations (data-driven rows,
/// reruns) never share state.
pub struct Invoker {
    method: Arc<MethodDescriptor>,
    resolver: MarkerResolver,
    default_timeout: Option<Duration>,
}

impl Invoker {
    /// Create an invoker for one resolved test method.
    pub fn new(method: Arc<MethodDescriptor>, resolver: MarkerResolver) -> Self {
        fault::install_panic_capture();
        Self {
            method,
            resolver,
            default_timeout: None,
        }
    }

    /// Set the run-wide default timeout applied when the method declares
    /// none.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// The timeout bounding the test body: the method's declared timeout,
    /// else the run default, else unbounded.
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.method.declared_timeout().or(self.default_timeout)
    }

    /// The method this invoker executes.
    pub fn method(&self) -> &Arc<MethodDescriptor> {
        &self.method
    }

    /// Build a fresh execution context for one invocation of this method.
    pub fn new_context(&self) -> TestContext {
        let fixture = self.method.fixture();
        TestContext::new(TestIdentity {
            suite: fixture.suite().name().to_string(),
            fixture: fixture.type_name().to_string(),
            method: self.method.name().to_string(),
        })
    }

    /// Run the six-phase lifecycle once and report the outcome.
    #[instrument(skip_all, fields(test = %self.method.member()))]
    pub fn invoke(&self, ctx: TestContext) -> TestResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let fixture = self.method.fixture();
        let categories = self
            .resolver
            .categories(self.method.member(), fixture.member());

        let mut recorder = OutcomeRecorder::new();
        if let Some(reason) = self.refusal_reason() {
            debug!(reason = %reason, "Invocation refused");
            recorder.record(
                Failure::not_runnable(fixture.type_name(), self.method.name(), &reason),
                Outcome::NotRunnable,
            );
        } else {
            // Phase 1: Construct. Without an instance nothing else can run,
            // dispose included.
            match self.construct() {
                Err(failure) => recorder.record(failure, Outcome::Failed),
                Ok(instance) => self.run_with_instance(instance, ctx, &mut recorder),
            }
        }

        let (outcome, primary_failure, secondary_failures) = recorder.finish();
        debug!(outcome = outcome.as_str(), "Invocation finished");
        TestResult {
            outcome,
            duration: clock.elapsed(),
            started_at,
            primary_failure,
            secondary_failures,
            categories,
        }
    }

    /// Pre-phase refusal: ignore markers and registration defects recorded
    /// on the descriptor. No phase runs for a refused invocation.
    fn refusal_reason(&self) -> Option<String> {
        let fixture = self.method.fixture();
        if let Some(ignore) = self
            .resolver
            .ignored(self.method.member(), fixture.member())
        {
            return Some(match ignore.reason {
                Some(reason) => format!("marked ignored: {}", reason),
                None => "marked ignored".to_string(),
            });
        }
        self.method.not_runnable().map(|reason| reason.to_string())
    }

    /// Phases 2-6, entered once an instance exists.
    fn run_with_instance(
        &self,
        instance: Instance,
        ctx: TestContext,
        recorder: &mut OutcomeRecorder,
    ) {
        let fixture = self.method.fixture();
        let type_name = fixture.type_name().to_string();
        let mut instance = instance;

        // Phase 2: SetContext. Context establishment is a precondition for
        // cleanup correctness, so its failure skips phases 3-5; dispose
        // still runs against the constructed instance.
        let context_ok = match self.set_context(&mut instance, ctx) {
            Ok(()) => true,
            Err(failure) => {
                recorder.record(failure, Outcome::Failed);
                false
            }
        };

        let mut instance = Some(instance);
        if context_ok {
            // Phase 3: InitializeChain. A fault stops the chain and skips
            // the body; the instance stays valid for cleanup.
            let mut init_ok = false;
            if let Some(inst) = instance.as_mut() {
                init_ok = self.run_initialize_chain(inst, recorder);
            }

            // Phase 4: TestBody.
            if init_ok {
                if let Some(owned) = instance.take() {
                    match self.run_body_phase(owned) {
                        BodyPhase::Completed(inst, verdict) => {
                            instance = Some(inst);
                            if let BodyVerdict::Faulted(body_fault) = verdict {
                                let outcome = match body_fault.kind {
                                    FaultKind::Inconclusive => Outcome::Inconclusive,
                                    FaultKind::Assertion | FaultKind::Error => Outcome::Failed,
                                };
                                recorder.record(
                                    Failure::test_body(
                                        &type_name,
                                        self.method.name(),
                                        body_fault,
                                    ),
                                    outcome,
                                );
                            }
                        }
                        BodyPhase::Abandoned(limit) => {
                            warn!(
                                fixture = %type_name,
                                method = self.method.name(),
                                "Test body exceeded its timeout; cleanup and dispose are delegated to the abandoned worker"
                            );
                            recorder.record(
                                Failure::timeout(&type_name, self.method.name(), limit),
                                Outcome::Timeout,
                            );
                        }
                        BodyPhase::SpawnFailed(spawn_fault) => {
                            recorder.record(
                                Failure::test_body(&type_name, self.method.name(), spawn_fault),
                                Outcome::Failed,
                            );
                        }
                    }
                }
            }

            // Phase 5: CleanupChain. Runs whenever construct+context
            // succeeded and the instance is still in our custody, even
            // after an initialize or body failure.
            if let Some(inst) = instance.as_mut() {
                self.run_cleanup_chain(inst, recorder);
            }
        }

        // Phase 6: Dispose. Runs whenever an instance exists, even when
        // phases 2-5 failed or were skipped.
        if let Some(inst) = instance.as_mut() {
            self.dispose(inst, recorder);
        }
    }

    fn construct(&self) -> Result<Instance, Failure> {
        let fixture = self.method.fixture();
        let constructor = fixture.constructor();
        fault::guarded(|| constructor())
            .map_err(|fault| Failure::instance_creation(fixture.type_name(), fault))
    }

    fn set_context(&self, instance: &mut Instance, ctx: TestContext) -> Result<(), Failure> {
        let fixture = self.method.fixture();
        let Some(slot) = fixture.context_slot() else {
            return Ok(());
        };
        let Some(setter) = slot.setter() else {
            // A slot without a setter is a valid shape; injection is a no-op.
            debug!(fixture = %fixture.type_name(), "Context slot has no setter, skipping injection");
            return Ok(());
        };
        fault::guarded(|| setter(instance, ctx))
            .map_err(|fault| Failure::context_set(fixture.type_name(), fault))
    }

    /// Runs inherited initialize entries base-to-derived, then the
    /// fixture's own initialize method. Stops at the first fault.
    fn run_initialize_chain(&self, instance: &mut Instance, recorder: &mut OutcomeRecorder) -> bool {
        let fixture = self.method.fixture();
        for method in fixture.initialize_sequence() {
            if let Err(init_fault) = invoke_member(method.body(), instance) {
                recorder.record(
                    Failure::initialize(fixture.type_name(), method.name(), init_fault),
                    Outcome::Failed,
                );
                return false;
            }
        }
        true
    }

    /// Runs the fixture's own cleanup method, then inherited entries
    /// derived-to-base. Every entry runs even if an earlier one faulted;
    /// failures are collected, not fatal to the chain.
    fn run_cleanup_chain(&self, instance: &mut Instance, recorder: &mut OutcomeRecorder) {
        let fixture = self.method.fixture();
        for method in fixture.cleanup_sequence() {
            if let Err(cleanup_fault) = invoke_member(method.body(), instance) {
                recorder.record(
                    Failure::cleanup(fixture.type_name(), method.name(), cleanup_fault),
                    Outcome::Failed,
                );
            }
        }
    }

    fn dispose(&self, instance: &mut Instance, recorder: &mut OutcomeRecorder) {
        let fixture = self.method.fixture();
        if let Some(dispose) = fixture.dispose() {
            if let Err(dispose_fault) = invoke_member(dispose, instance) {
                recorder.record(
                    Failure::dispose(fixture.type_name(), dispose_fault),
                    Outcome::Failed,
                );
            }
        }
    }

    /// Phase 4 driver. Without a timeout the body runs on the calling
    /// thread; with one it runs on a worker that owns the instance and
    /// sends it back, racing the clock.
    fn run_body_phase(&self, instance: Instance) -> BodyPhase {
        match self.effective_timeout() {
            None => {
                let mut instance = instance;
                let verdict = run_body_to_completion(self.method.body(), &mut instance);
                BodyPhase::Completed(instance, verdict)
            }
            Some(limit) => {
                let (tx, rx) = mpsc::channel::<(Instance, BodyVerdict)>();
                let body = Arc::clone(self.method.body());
                let fixture = Arc::clone(self.method.fixture());
                let spawn = thread::Builder::new()
                    .name(format!("proctor-body-{}", self.method.name()))
                    .spawn(move || {
                        let mut instance = instance;
                        let verdict = run_body_to_completion(&body, &mut instance);
                        if let Err(returned) = tx.send((instance, verdict)) {
                            // The invoker stopped waiting at the timeout;
                            // this worker still owns the instance and must
                            // finalize it.
                            let (instance, _) = returned.0;
                            finalize_abandoned(&fixture, instance);
                        }
                    });
                match spawn {
                    Ok(worker) => match rx.recv_timeout(limit) {
                        Ok((instance, verdict)) => {
                            let _ = worker.join();
                            BodyPhase::Completed(instance, verdict)
                        }
                        Err(_) => {
                            // Dropping the receiver is what routes the
                            // worker into abandoned finalization.
                            drop(rx);
                            BodyPhase::Abandoned(limit)
                        }
                    },
                    Err(e) => BodyPhase::SpawnFailed(Fault::error(
                        std::any::type_name::<std::io::Error>(),
                        e.to_string(),
                    )),
                }
            }
        }
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("method", &self.method)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

/// Invoke a member handle and wait out an asynchronous completion. The
/// chain callers advance only after the wait, keeping each invocation's
/// phase sequence strictly linear.
fn invoke_member(body: &MethodFn, instance: &mut Instance) -> Result<(), Fault> {
    match fault::guarded(|| body(instance))? {
        MethodReturn::Done => Ok(()),
        MethodReturn::Pending(handle) => handle.wait(),
    }
}

fn run_body_to_completion(body: &MethodFn, instance: &mut Instance) -> BodyVerdict {
    match invoke_member(body, instance) {
        Ok(()) => BodyVerdict::Passed,
        Err(body_fault) => BodyVerdict::Faulted(body_fault),
    }
}

/// Best-effort finalization of an instance abandoned to its worker after a
/// timeout. Results are logged, not reported: the invoker has already
/// returned its Timeout result.
fn finalize_abandoned(fixture: &FixtureDescriptor, mut instance: Instance) {
    warn!(
        fixture = %fixture.type_name(),
        "Finalizing instance abandoned after timeout"
    );
    for method in fixture.cleanup_sequence() {
        if let Err(cleanup_fault) = invoke_member(method.body(), &mut instance) {
            warn!(
                fixture = %fixture.type_name(),
                method = method.name(),
                "Cleanup faulted during abandoned finalization: {}",
                cleanup_fault.message
            );
        }
    }
    if let Some(dispose) = fixture.dispose() {
        if let Err(dispose_fault) = invoke_member(dispose, &mut instance) {
            warn!(
                fixture = %fixture.type_name(),
                "Dispose faulted during abandoned finalization: {}",
                dispose_fault.message
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::{IgnoreMarker, TestMarker, TestSuiteMarker, TimeoutMarker};
    use crate::metadata::MetadataProvider;
    use crate::registry::{FixtureSpec, MethodSpec, Registry, SuiteSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        value: u32,
    }

    fn invoker_for(registry: Registry, type_name: &str, method: &str) -> Invoker {
        let registry = Arc::new(registry);
        let resolver =
            MarkerResolver::new(Arc::clone(&registry) as Arc<dyn MetadataProvider>);
        let fixture = crate::descriptors::FixtureDescriptor::resolve(&registry, &resolver, type_name)
            .expect("fixture resolves");
        let method =
            crate::descriptors::MethodDescriptor::resolve(&registry, &resolver, fixture, method)
                .expect("method resolves");
        Invoker::new(method, resolver)
    }

    #[test]
    fn test_constructor_runs_once_per_invocation() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let counting = Arc::clone(&constructed);
        let registry = Registry::builder()
            .suite(
                SuiteSpec::builder("demo")
                    .fixture(
                        FixtureSpec::builder("demo::Counter")
                            .marker(TestSuiteMarker)
                            .constructor(move || {
                                counting.fetch_add(1, Ordering::SeqCst);
                                Counter::default()
                            })
                            .method(
                                MethodSpec::builder("increment")
                                    .marker(TestMarker)
                                    .body(|c: &mut Counter| {
                                        c.value += 1;
                                    })
                                    .build(),
                            )
                            .build(),
                    )
                    .build(),
            )
            .build();
        let invoker = invoker_for(registry, "demo::Counter", "increment");

        let first = invoker.invoke(invoker.new_context());
        let second = invoker.invoke(invoker.new_context());
        assert_eq!(first.outcome, Outcome::Passed);
        assert_eq!(second.outcome, Outcome::Passed);
        // Two invocations, two independent instances.
        assert_eq!(constructed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_ignored_method_is_not_runnable() {
        let registry = Registry::builder()
            .suite(
                SuiteSpec::builder("demo")
                    .fixture(
                        FixtureSpec::builder("demo::Counter")
                            .marker(TestSuiteMarker)
                            .constructor(Counter::default)
                            .method(
                                MethodSpec::builder("increment")
                                    .marker(TestMarker)
                                    .marker(IgnoreMarker::because("flaky on CI"))
                                    .body(|_: &mut Counter| {})
                                    .build(),
                            )
                            .build(),
                    )
                    .build(),
            )
            .build();
        let invoker = invoker_for(registry, "demo::Counter", "increment");
        let result = invoker.invoke(invoker.new_context());
        assert_eq!(result.outcome, Outcome::NotRunnable);
        let failure = result.primary_failure.expect("refusal reason");
        assert_eq!(
            failure.message,
            "Test demo::Counter::increment is not runnable: marked ignored: flaky on CI"
        );
    }

    #[test]
    fn test_effective_timeout_prefers_declared() {
        let registry = Registry::builder()
            .suite(
                SuiteSpec::builder("demo")
                    .fixture(
                        FixtureSpec::builder("demo::Counter")
                            .marker(TestSuiteMarker)
                            .constructor(Counter::default)
                            .method(
                                MethodSpec::builder("increment")
                                    .marker(TestMarker)
                                    .marker(TimeoutMarker::from_millis(750))
                                    .body(|_: &mut Counter| {})
                                    .build(),
                            )
                            .build(),
                    )
                    .build(),
            )
            .build();
        let invoker = invoker_for(registry, "demo::Counter", "increment")
            .with_default_timeout(Some(Duration::from_secs(30)));
        assert_eq!(invoker.effective_timeout(), Some(Duration::from_millis(750)));
    }

    #[test]
    fn test_timeout_returns_promptly_and_reports_timeout() {
        let registry = Registry::builder()
            .suite(
                SuiteSpec::builder("demo")
                    .fixture(
                        FixtureSpec::builder("demo::Counter")
                            .marker(TestSuiteMarker)
                            .constructor(Counter::default)
                            .method(
                                MethodSpec::builder("stall")
                                    .marker(TestMarker)
                                    .marker(TimeoutMarker::from_millis(50))
                                    .body(|_: &mut Counter| {
                                        thread::sleep(Duration::from_secs(5));
                                    })
                                    .build(),
                            )
                            .build(),
                    )
                    .build(),
            )
            .build();
        let invoker = invoker_for(registry, "demo::Counter", "stall");
        let clock = Instant::now();
        let result = invoker.invoke(invoker.new_context());
        assert_eq!(result.outcome, Outcome::Timeout);
        // Prompt return: well under the body's five-second stall.
        assert!(clock.elapsed() < Duration::from_secs(2));
        let failure = result.primary_failure.expect("timeout failure");
        assert_eq!(
            failure.message,
            "Test demo::Counter::stall exceeded execution timeout period (50ms)"
        );
    }
}
