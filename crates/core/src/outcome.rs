//! Invocation outcomes and failure records
//!
//! A test invocation always produces a [`TestResult`]; faults from any
//! phase are folded into it, never propagated. The failure messages are a
//! published contract: deterministic single-line strings embedding the
//! phase, the fully qualified fixture type, the failing member's simple
//! name where applicable, and the original fault's type name and message.
//! Two runs of the same failing test produce byte-identical failure text,
//! which the surrounding tooling relies on for golden-file assertions.

use crate::fault::{Fault, FaultKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Final outcome of one test invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    /// Every phase completed without fault.
    Passed,
    /// A phase faulted (assertion, unhandled fault, lifecycle failure).
    Failed,
    /// The test body signalled the inconclusive outcome.
    Inconclusive,
    /// The test body exceeded its timeout.
    Timeout,
    /// The invocation was refused before any phase ran.
    NotRunnable,
}

impl Outcome {
    /// Get the outcome name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Inconclusive => "inconclusive",
            Outcome::Timeout => "timeout",
            Outcome::NotRunnable => "notRunnable",
        }
    }
}

/// Which phase (and failure class) produced a failure record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Constructor faulted; no instance exists.
    InstanceCreation,
    /// Context injection faulted.
    ContextSet,
    /// An initialize-chain entry faulted.
    Initialize,
    /// Explicit assertion failure from the test body.
    Assertion,
    /// Explicit inconclusive signal from the test body.
    Inconclusive,
    /// The test body exceeded its timeout.
    Timeout,
    /// Any other fault from the test body.
    Unhandled,
    /// A cleanup-chain entry faulted.
    Cleanup,
    /// The dispose handle faulted.
    Dispose,
    /// The invocation was refused before any phase ran.
    NotRunnable,
}

/// One recorded failure: the kind, the contract-formatted message, and a
/// stack-trace excerpt beginning at the first user-code frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl Failure {
    /// Constructor fault: no instance was created.
    pub fn instance_creation(fixture: &str, fault: Fault) -> Self {
        Self {
            kind: FailureKind::InstanceCreation,
            message: format!(
                "Failed to create an instance of fixture {}: {}: {}",
                fixture, fault.type_name, fault.message
            ),
            stack_trace: fault.stack_trace,
        }
    }

    /// Context-injection fault.
    pub fn context_set(fixture: &str, fault: Fault) -> Self {
        Self {
            kind: FailureKind::ContextSet,
            message: format!(
                "Failed to set the execution context for {}: {}: {}",
                fixture, fault.type_name, fault.message
            ),
            stack_trace: fault.stack_trace,
        }
    }

    /// Fault from one initialize-chain entry.
    pub fn initialize(fixture: &str, member: &str, fault: Fault) -> Self {
        Self {
            kind: FailureKind::Initialize,
            message: format!(
                "Initialize method {}::{} threw exception: {}: {}",
                fixture, member, fault.type_name, fault.message
            ),
            stack_trace: fault.stack_trace,
        }
    }

    /// Classified fault from the test body.
    pub fn test_body(fixture: &str, method: &str, fault: Fault) -> Self {
        match fault.kind {
            FaultKind::Assertion => Self {
                kind: FailureKind::Assertion,
                message: format!("Test method {}::{} failed: {}", fixture, method, fault.message),
                stack_trace: fault.stack_trace,
            },
            FaultKind::Inconclusive => Self {
                kind: FailureKind::Inconclusive,
                message: format!(
                    "Test method {}::{} was inconclusive: {}",
                    fixture, method, fault.message
                ),
                stack_trace: fault.stack_trace,
            },
            FaultKind::Error => Self {
                kind: FailureKind::Unhandled,
                message: format!(
                    "Test method {}::{} threw exception: {}: {}",
                    fixture, method, fault.type_name, fault.message
                ),
                stack_trace: fault.stack_trace,
            },
        }
    }

    /// The test body lost the race against its timeout.
    pub fn timeout(fixture: &str, method: &str, limit: Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!(
                "Test {}::{} exceeded execution timeout period ({}ms)",
                fixture,
                method,
                limit.as_millis()
            ),
            stack_trace: None,
        }
    }

    /// Fault from one cleanup-chain entry.
    pub fn cleanup(fixture: &str, member: &str, fault: Fault) -> Self {
        Self {
            kind: FailureKind::Cleanup,
            message: format!(
                "Cleanup method {}::{} threw exception: {}: {}",
                fixture, member, fault.type_name, fault.message
            ),
            stack_trace: fault.stack_trace,
        }
    }

    /// The invocation was refused (ignored test, defective registration).
    pub fn not_runnable(fixture: &str, method: &str, reason: &str) -> Self {
        Self {
            kind: FailureKind::NotRunnable,
            message: format!("Test {}::{} is not runnable: {}", fixture, method, reason),
            stack_trace: None,
        }
    }

    /// Fault from the dispose handle.
    pub fn dispose(fixture: &str, fault: Fault) -> Self {
        Self {
            kind: FailureKind::Dispose,
            message: format!(
                "Dispose of {} threw exception: {}: {}",
                fixture, fault.type_name, fault.message
            ),
            stack_trace: fault.stack_trace,
        }
    }
}

/// Result of one test invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Final outcome.
    pub outcome: Outcome,
    /// Wall-clock duration of the whole invocation.
    pub duration: Duration,
    /// Timestamp when the invocation started.
    pub started_at: DateTime<Utc>,
    /// The failure that fixed the outcome, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_failure: Option<Failure>,
    /// Failures recorded after the outcome was already fixed
    /// (cleanup/dispose faults following an earlier failure).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_failures: Vec<Failure>,
    /// Categories aggregated across method/class/suite scope, for
    /// downstream filtering and reporting.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

impl TestResult {
    /// Whether the invocation passed.
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Primary/secondary failure bookkeeping for one invocation.
///
/// The first recorded failure fixes the outcome and becomes primary;
/// everything recorded afterwards is secondary, regardless of phase. A
/// recorder that finishes without a failure yields Passed.
#[derive(Debug, Default)]
pub struct OutcomeRecorder {
    outcome: Option<Outcome>,
    primary: Option<Failure>,
    secondary: Vec<Failure>,
}

impl OutcomeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure. `outcome_if_primary` only applies when no earlier
    /// failure exists.
    pub fn record(&mut self, failure: Failure, outcome_if_primary: Outcome) {
        if self.primary.is_none() {
            self.outcome = Some(outcome_if_primary);
            self.primary = Some(failure);
        } else {
            self.secondary.push(failure);
        }
    }

    /// Whether a primary failure has been recorded.
    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Close the record, yielding Passed when nothing failed.
    pub fn finish(self) -> (Outcome, Option<Failure>, Vec<Failure>) {
        (
            self.outcome.unwrap_or(Outcome::Passed),
            self.primary,
            self.secondary,
        )
    }
}
