//! Suite planning and execution
//!
//! Turns a [`Registry`] into an ordered test plan (derived-test-marker
//! selection, regex and category filtering, priority ordering) and drives
//! one [`Invoker`] per selected method, serially or on a bounded worker
//! pool. The runner owns the per-invocation [`TestContext`] and attaches
//! its captured output to the completed record.

use crate::cli::HarnessArgs;
use anyhow::{Context as _, Result};
use proctor_core::config::RunConfig;
use proctor_core::context::TestContext;
use proctor_core::descriptors::{FixtureDescriptor, MethodDescriptor};
use proctor_core::invoker::Invoker;
use proctor_core::markers::names;
use proctor_core::metadata::{MemberId, MetadataProvider};
use proctor_core::outcome::{Outcome, TestResult};
use proctor_core::registry::Registry;
use proctor_core::resolver::MarkerResolver;
use regex::Regex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One selected test, ready to invoke.
pub struct PlannedTest {
    /// Fully qualified test name (`fixture::method`).
    pub fqn: String,
    /// Aggregated categories, method scope first.
    pub categories: Vec<String>,
    method: Arc<MethodDescriptor>,
    priority: i32,
}

impl PlannedTest {
    /// Fully qualified name accessor for listings.
    pub fn name(&self) -> &str {
        &self.fqn
    }
}

/// One executed test with its captured output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTest {
    /// Owning suite name.
    pub suite: String,
    /// Fully qualified fixture type name.
    pub fixture: String,
    /// Method simple name.
    pub method: String,
    /// The invocation result.
    pub result: TestResult,
    /// Lines the test wrote through its execution context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
}

impl CompletedTest {
    /// Fully qualified test name.
    pub fn fqn(&self) -> String {
        format!("{}::{}", self.fixture, self.method)
    }
}

/// Aggregated result of a whole run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Completed tests in plan order.
    pub tests: Vec<CompletedTest>,
    /// Total wall-clock duration.
    pub duration: Duration,
}

impl RunSummary {
    /// Count of tests with the given outcome.
    pub fn count(&self, outcome: Outcome) -> usize {
        self.tests
            .iter()
            .filter(|t| t.result.outcome == outcome)
            .count()
    }

    /// Whether the run failed: any Failed or Timeout outcome. NotRunnable
    /// records (ignored tests, registration defects) are reported but do
    /// not fail the run by themselves.
    pub fn failed(&self) -> bool {
        self.count(Outcome::Failed) + self.count(Outcome::Timeout) > 0
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        if self.failed() {
            1
        } else {
            0
        }
    }
}

/// Select and order the tests a run will execute.
///
/// A method is a test when it carries the test marker or one derived from
/// it. Fixtures that fail descriptor resolution are skipped with a
/// warning; a defective method registration still plans (the invoker
/// reports it as NotRunnable). Plan order is priority (lower first,
/// undeclared last), stable within equal priorities.
pub fn plan(
    registry: &Arc<Registry>,
    resolver: &MarkerResolver,
    args: &HarnessArgs,
) -> Result<Vec<PlannedTest>> {
    let name_filter = match &args.filter {
        Some(pattern) => {
            Some(Regex::new(pattern).with_context(|| format!("invalid filter '{}'", pattern))?)
        }
        None => None,
    };

    let mut planned = Vec::new();
    for suite in registry.suites() {
        for fixture_spec in suite.fixtures() {
            let has_tests = fixture_spec.methods().any(|method| {
                let member = MemberId::method_of(fixture_spec.type_name(), method.name());
                resolver.has_marker_derived_from(&member, names::TEST, false).0
            });
            if !has_tests {
                continue;
            }
            let fixture = match FixtureDescriptor::resolve(registry, resolver, fixture_spec.type_name())
            {
                Ok(fixture) => fixture,
                Err(e) => {
                    warn!(
                        fixture = %fixture_spec.type_name(),
                        "Skipping fixture that fails descriptor resolution: {}",
                        e
                    );
                    continue;
                }
            };
            for method_spec in fixture_spec.methods() {
                let member = MemberId::method_of(fixture_spec.type_name(), method_spec.name());
                let (is_test, _) = resolver.has_marker_derived_from(&member, names::TEST, false);
                if !is_test {
                    continue;
                }
                let method = match MethodDescriptor::resolve(
                    registry,
                    resolver,
                    Arc::clone(&fixture),
                    method_spec.name(),
                ) {
                    Ok(method) => method,
                    Err(e) => {
                        warn!(test = %member, "Skipping unresolvable test method: {}", e);
                        continue;
                    }
                };

                let fqn = member.name().to_string();
                if let Some(regex) = &name_filter {
                    if !regex.is_match(&fqn) {
                        continue;
                    }
                }
                let categories = resolver.categories(&member, fixture.member());
                if !args.categories.is_empty()
                    && !args.categories.iter().any(|c| categories.contains(c))
                {
                    continue;
                }

                planned.push(PlannedTest {
                    fqn,
                    categories,
                    priority: method.priority().unwrap_or(i32::MAX),
                    method,
                });
            }
        }
    }
    planned.sort_by_key(|test| test.priority);
    debug!(selected = planned.len(), "Planned test selection");
    Ok(planned)
}

/// Execute a plan and aggregate the summary.
///
/// Runs serially for a single worker, otherwise on a bounded pool of
/// worker threads pulling from a shared queue. With fail-fast, the first
/// failing test stops further scheduling; tests already running finish
/// normally.
pub fn execute(
    planned: Vec<PlannedTest>,
    resolver: &MarkerResolver,
    config: &RunConfig,
) -> RunSummary {
    let clock = Instant::now();
    let total = planned.len();
    let workers = config.worker_count().min(total.max(1));
    info!(total, workers, "Starting test run");

    let queue: Arc<Mutex<VecDeque<(usize, PlannedTest)>>> =
        Arc::new(Mutex::new(planned.into_iter().enumerate().collect()));
    let stop = Arc::new(AtomicBool::new(false));
    let completed: Arc<Mutex<Vec<(usize, CompletedTest)>>> = Arc::new(Mutex::new(Vec::new()));

    thread::scope(|scope| {
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            let completed = Arc::clone(&completed);
            let resolver = resolver.clone();
            scope.spawn(move || loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let next = queue.lock().ok().and_then(|mut q| q.pop_front());
                let Some((index, test)) = next else {
                    break;
                };
                let record = run_one(&test, &resolver, config);
                let failed = matches!(
                    record.result.outcome,
                    Outcome::Failed | Outcome::Timeout
                );
                if let Ok(mut results) = completed.lock() {
                    results.push((index, record));
                }
                if failed && config.fail_fast {
                    info!(test = %test.fqn, "Fail-fast triggered, stopping scheduling");
                    stop.store(true, Ordering::SeqCst);
                }
            });
        }
    });

    let mut results = completed
        .lock()
        .map(|mut r| std::mem::take(&mut *r))
        .unwrap_or_default();
    results.sort_by_key(|(index, _)| *index);
    RunSummary {
        tests: results.into_iter().map(|(_, record)| record).collect(),
        duration: clock.elapsed(),
    }
}

fn run_one(test: &PlannedTest, resolver: &MarkerResolver, config: &RunConfig) -> CompletedTest {
    let invoker = Invoker::new(Arc::clone(&test.method), resolver.clone())
        .with_default_timeout(config.default_timeout());
    let ctx: TestContext = invoker.new_context();
    let identity = ctx.identity().clone();
    debug!(test = %test.fqn, "Invoking");
    let result = invoker.invoke(ctx.clone());
    CompletedTest {
        suite: identity.suite,
        fixture: identity.fixture,
        method: identity.method,
        result,
        output: ctx.captured_lines(),
    }
}
