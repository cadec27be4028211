//! Fault capture and classification
//!
//! User code signals failure by panicking: the assertion helpers panic with
//! typed payloads, fallible adapters wrap returned errors into an
//! [`ErrorFault`] payload, and anything else that unwinds is an unhandled
//! fault. The engine guards every call into user code with
//! [`guarded`], which catches the unwind, captures a backtrace trimmed to
//! the first user frame, and classifies the payload into a [`Fault`].
//!
//! Asynchronous lifecycle and test methods return a [`CompletionHandle`];
//! the invoker blocks on the handle before advancing to the next phase.

use once_cell::sync::Lazy;
use regex::Regex;
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Once;
use std::thread;
use std::time::Duration;

/// How a captured fault should map onto a test outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// An explicit assertion failure (the "test failed" signal).
    Assertion,
    /// The explicit inconclusive signal.
    Inconclusive,
    /// Any other fault: returned error values, stray panics.
    Error,
}

/// A classified fault captured from user code.
///
/// `type_name` and `message` feed the deterministic failure-message
/// contract; `stack_trace` is the excerpt beginning at the first user frame.
#[derive(Debug, Clone)]
pub struct Fault {
    pub kind: FaultKind,
    pub type_name: String,
    pub message: String,
    pub stack_trace: Option<String>,
}

impl Fault {
    /// Build an error-kind fault from explicit parts.
    pub fn error(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Error,
            type_name: type_name.into(),
            message: message.into(),
            stack_trace: None,
        }
    }

    fn abandoned_completion() -> Self {
        Self::error(
            "CompletionHandle",
            "the asynchronous completion was dropped without a result",
        )
    }
}

/// Panic payload for an explicit assertion failure.
#[derive(Debug, Clone)]
pub struct AssertionFailed {
    pub message: String,
}

/// Panic payload for the explicit inconclusive signal.
#[derive(Debug, Clone)]
pub struct Inconclusive {
    pub message: String,
}

/// Panic payload wrapping an error value returned by a fallible method.
#[derive(Debug, Clone)]
pub struct ErrorFault {
    pub type_name: String,
    pub message: String,
}

impl ErrorFault {
    /// Capture an error value, recording its concrete type name.
    pub fn from_error<E: std::fmt::Display>(error: &E) -> Self {
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
        }
    }
}

/// Fail the current test with an explicit assertion failure.
pub fn fail(message: impl Into<String>) -> ! {
    panic::panic_any(AssertionFailed {
        message: message.into(),
    })
}

/// Mark the current test inconclusive.
pub fn inconclusive(message: impl Into<String>) -> ! {
    panic::panic_any(Inconclusive {
        message: message.into(),
    })
}

/// Assert a condition, failing the test with `message` when it is false.
pub fn assert_that(condition: bool, message: impl Into<String>) {
    if !condition {
        fail(message);
    }
}

/// Raise an error value as a test fault, preserving its type name.
pub fn raise<E: std::fmt::Display>(error: E) -> ! {
    panic::panic_any(ErrorFault::from_error(&error))
}

thread_local! {
    // Depth of guarded user-code calls on this thread. The panic hook only
    // captures (and suppresses default printing) while a guard is active.
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    static CAPTURED_BACKTRACE: Cell<Option<String>> = const { Cell::new(None) };
}

static HOOK: Once = Once::new();

/// Install the panic hook that captures backtraces for guarded calls.
///
/// Safe to call repeatedly; the hook chains to the previous one for panics
/// that do not originate inside a guarded user-code call.
pub fn install_panic_capture() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let guarded = GUARD_DEPTH.with(|depth| depth.get() > 0);
            if guarded {
                let backtrace = std::backtrace::Backtrace::force_capture().to_string();
                CAPTURED_BACKTRACE.with(|slot| slot.set(Some(backtrace)));
            } else {
                previous(info);
            }
        }));
    });
}

/// Run a closure of user code, converting an unwind into a classified fault.
pub fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, Fault> {
    install_panic_capture();
    GUARD_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    GUARD_DEPTH.with(|depth| depth.set(depth.get() - 1));
    match outcome {
        Ok(value) => Ok(value),
        Err(payload) => {
            let backtrace = CAPTURED_BACKTRACE.with(|slot| slot.take());
            Err(classify(payload, backtrace.map(|b| trim_backtrace(&b))))
        }
    }
}

/// Classify a panic payload into a [`Fault`].
fn classify(payload: Box<dyn Any + Send>, stack_trace: Option<String>) -> Fault {
    let payload = match payload.downcast::<AssertionFailed>() {
        Ok(assertion) => {
            return Fault {
                kind: FaultKind::Assertion,
                type_name: std::any::type_name::<AssertionFailed>().to_string(),
                message: assertion.message,
                stack_trace,
            }
        }
        Err(other) => other,
    };
    let payload = match payload.downcast::<Inconclusive>() {
        Ok(signal) => {
            return Fault {
                kind: FaultKind::Inconclusive,
                type_name: std::any::type_name::<Inconclusive>().to_string(),
                message: signal.message,
                stack_trace,
            }
        }
        Err(other) => other,
    };
    let payload = match payload.downcast::<ErrorFault>() {
        Ok(error) => {
            return Fault {
                kind: FaultKind::Error,
                type_name: error.type_name,
                message: error.message,
                stack_trace,
            }
        }
        Err(other) => other,
    };
    let message = match payload.downcast::<String>() {
        Ok(text) => *text,
        Err(other) => match other.downcast::<&'static str>() {
            Ok(text) => (*text).to_string(),
            Err(_) => "<non-string panic payload>".to_string(),
        },
    };
    Fault {
        kind: FaultKind::Error,
        type_name: "panic".to_string(),
        message,
        stack_trace,
    }
}

static FRAME_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+:\s*(.+?)\s*$").expect("frame pattern is valid"));

// Frames the engine owns: everything before the first frame outside these
// prefixes is invocation plumbing and is cut from the front of the trace.
const ENGINE_FRAME_PREFIXES: &[&str] = &[
    "std::panicking",
    "std::panic",
    "std::sys",
    "std::rt",
    "std::backtrace",
    "core::panicking",
    "core::ops::function",
    "rust_begin_unwind",
    "__rust",
    "proctor_core::fault",
    "proctor_core::invoker",
];

fn is_engine_frame(symbol: &str) -> bool {
    ENGINE_FRAME_PREFIXES
        .iter()
        .any(|prefix| symbol.starts_with(prefix))
}

/// Trim leading engine frames so the excerpt begins at the first user frame.
///
/// Backtrace text alternates frame lines (`  N: symbol`) with location lines
/// (`      at path:line`); location lines travel with their frame.
pub fn trim_backtrace(raw: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut keeping = false;
    for line in raw.lines() {
        if let Some(captures) = FRAME_LINE.captures(line) {
            let symbol = captures.get(1).map(|m| m.as_str()).unwrap_or("");
            if !keeping && !is_engine_frame(symbol) {
                keeping = true;
            }
            if keeping {
                kept.push(line);
            }
        } else if keeping {
            kept.push(line);
        }
    }
    if kept.is_empty() {
        // Unrecognized format; better the full trace than none.
        raw.to_string()
    } else {
        kept.join("\n")
    }
}

/// Completer side of a manually resolved completion.
pub struct Completer {
    tx: Sender<Result<(), Fault>>,
}

impl Completer {
    /// Resolve the completion. A dropped receiver means the invocation was
    /// abandoned; the result is discarded in that case.
    pub fn complete(self, result: Result<(), Fault>) {
        let _ = self.tx.send(result);
    }
}

/// Handle to an asynchronous method completion.
///
/// Returned by async lifecycle/test methods; the invoker blocks on it
/// before advancing, keeping each invocation's phase sequence strictly
/// linear.
pub struct CompletionHandle {
    rx: Receiver<Result<(), Fault>>,
}

impl CompletionHandle {
    /// Create an unresolved completion and its completer.
    pub fn pending() -> (Completer, CompletionHandle) {
        let (tx, rx) = mpsc::channel();
        (Completer { tx }, CompletionHandle { rx })
    }

    /// Run `f` on a dedicated thread and resolve the handle with its fault
    /// classification when it returns.
    pub fn spawn(f: impl FnOnce() + Send + 'static) -> Self {
        let (completer, handle) = Self::pending();
        thread::spawn(move || {
            let outcome = guarded(f);
            completer.complete(outcome);
        });
        handle
    }

    /// Block until the completion resolves.
    pub fn wait(self) -> Result<(), Fault> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(Fault::abandoned_completion()))
    }

    /// Block up to `limit`; None means the clock won.
    pub fn wait_for(self, limit: Duration) -> Option<Result<(), Fault>> {
        match self.rx.recv_timeout(limit) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Disconnected) => Some(Err(Fault::abandoned_completion())),
            Err(RecvTimeoutError::Timeout) => None,
        }
    }
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle").finish_non_exhaustive()
    }
}
