//! Shared support for the integration suites: an event log the
//! instrumented fixtures append to, so tests can assert phase ordering and
//! side effects across invocations.

use proctor_core::context::TestContext;
use std::sync::{Arc, Mutex};

/// Shared, thread-safe event log.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Create an empty event log.
pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Append an event.
pub fn record(log: &EventLog, event: impl Into<String>) {
    log.lock().expect("event log lock").push(event.into());
}

/// Snapshot of the recorded events, in order.
pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().expect("event log lock").clone()
}

/// Instrumented fixture: carries the shared log and the injected context.
pub struct Tracked {
    pub log: EventLog,
    pub ctx: Option<TestContext>,
}

impl Tracked {
    pub fn new(log: EventLog) -> Self {
        Self { log, ctx: None }
    }
}
