//! Per-invocation execution context
//!
//! The run orchestrator owns a [`TestContext`] per invocation and hands it
//! to the invoker, which injects it into the fixture instance through the
//! fixture's context slot. The context exposes the current test identity
//! and a write-line sink whose captured output the reporting layer attaches
//! to the result. Contexts are never shared across concurrent invocations
//! of the same method.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Identity of the test a context belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestIdentity {
    /// Owning suite name.
    pub suite: String,
    /// Fully qualified fixture type name.
    pub fixture: String,
    /// Method simple name.
    pub method: String,
}

impl TestIdentity {
    /// Fully qualified test name (`fixture::method`).
    pub fn fully_qualified_name(&self) -> String {
        format!("{}::{}", self.fixture, self.method)
    }
}

#[derive(Debug, Default)]
struct ContextState {
    lines: Vec<String>,
    properties: HashMap<String, String>,
}

/// Execution context injected into a fixture instance per invocation.
///
/// Cheap to clone; all clones share the same capture buffer, so the
/// orchestrator keeps one clone to read captured output after the
/// invocation returns.
#[derive(Debug, Clone)]
pub struct TestContext {
    identity: Arc<TestIdentity>,
    state: Arc<Mutex<ContextState>>,
}

impl TestContext {
    /// Create a context for one invocation of the identified test.
    pub fn new(identity: TestIdentity) -> Self {
        Self {
            identity: Arc::new(identity),
            state: Arc::new(Mutex::new(ContextState::default())),
        }
    }

    /// Identity of the running test.
    pub fn identity(&self) -> &TestIdentity {
        &self.identity
    }

    /// Append a line to the captured output.
    pub fn write_line(&self, line: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.lines.push(line.into());
        }
    }

    /// Snapshot of the captured output lines, in write order.
    pub fn captured_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.lines.clone())
            .unwrap_or_default()
    }

    /// Set a string property on the context.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.properties.insert(key.into(), value.into());
        }
    }

    /// Read a string property from the context.
    pub fn property(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.properties.get(key).cloned())
    }
}
