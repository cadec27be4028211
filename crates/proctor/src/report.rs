//! Run reporting
//!
//! Renders a [`RunSummary`] to stdout as human-readable text or as a
//! stable JSON document. Log output stays on stderr; stdout carries only
//! the report, so JSON mode is machine-consumable as-is.

use crate::runner::{CompletedTest, PlannedTest, RunSummary};
use anyhow::Result;
use proctor_core::outcome::Outcome;
use serde_json::json;
use std::io::Write;

/// Print the selected test names, one per line, with their categories.
pub fn print_list(out: &mut impl Write, planned: &[PlannedTest]) -> Result<()> {
    for test in planned {
        if test.categories.is_empty() {
            writeln!(out, "{}", test.name())?;
        } else {
            writeln!(out, "{} [{}]", test.name(), test.categories.join(", "))?;
        }
    }
    writeln!(out, "{} tests", planned.len())?;
    Ok(())
}

/// Print the per-test lines and the closing tally in text form.
pub fn print_text(out: &mut impl Write, summary: &RunSummary) -> Result<()> {
    for test in &summary.tests {
        writeln!(
            out,
            "{:<12} {} ({} ms)",
            test.result.outcome.as_str(),
            test.fqn(),
            test.result.duration.as_millis()
        )?;
        if let Some(failure) = &test.result.primary_failure {
            writeln!(out, "    {}", failure.message)?;
            if let Some(trace) = &failure.stack_trace {
                for line in trace.lines() {
                    writeln!(out, "    {}", line)?;
                }
            }
        }
        for failure in &test.result.secondary_failures {
            writeln!(out, "    (secondary) {}", failure.message)?;
        }
        for line in &test.output {
            writeln!(out, "    > {}", line)?;
        }
    }
    writeln!(
        out,
        "{} passed, {} failed, {} inconclusive, {} timed out, {} not runnable in {:.2}s",
        summary.count(Outcome::Passed),
        summary.count(Outcome::Failed),
        summary.count(Outcome::Inconclusive),
        summary.count(Outcome::Timeout),
        summary.count(Outcome::NotRunnable),
        summary.duration.as_secs_f64()
    )?;
    Ok(())
}

/// Print the run as one JSON document.
pub fn print_json(out: &mut impl Write, summary: &RunSummary) -> Result<()> {
    let tests: Vec<serde_json::Value> = summary.tests.iter().map(test_json).collect();
    let doc = json!({
        "summary": {
            "total": summary.tests.len(),
            "passed": summary.count(Outcome::Passed),
            "failed": summary.count(Outcome::Failed),
            "inconclusive": summary.count(Outcome::Inconclusive),
            "timedOut": summary.count(Outcome::Timeout),
            "notRunnable": summary.count(Outcome::NotRunnable),
            "durationMs": summary.duration.as_millis() as u64,
        },
        "tests": tests,
    });
    writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;
    Ok(())
}

fn test_json(test: &CompletedTest) -> serde_json::Value {
    let mut value = json!({
        "name": test.fqn(),
        "suite": test.suite,
        "outcome": test.result.outcome,
        "durationMs": test.result.duration.as_millis() as u64,
        "startedAt": test.result.started_at,
    });
    if let Some(object) = value.as_object_mut() {
        if !test.result.categories.is_empty() {
            object.insert("categories".to_string(), json!(test.result.categories));
        }
        if let Some(failure) = &test.result.primary_failure {
            object.insert("failure".to_string(), json!(failure));
        }
        if !test.result.secondary_failures.is_empty() {
            object.insert(
                "secondaryFailures".to_string(),
                json!(test.result.secondary_failures),
            );
        }
        if !test.output.is_empty() {
            object.insert("output".to_string(), json!(test.output));
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctor_core::outcome::{Failure, TestResult};
    use std::time::Duration;

    fn completed(outcome: Outcome, failure: Option<Failure>) -> CompletedTest {
        CompletedTest {
            suite: "demo".to_string(),
            fixture: "demo::Widget".to_string(),
            method: "build".to_string(),
            result: TestResult {
                outcome,
                duration: Duration::from_millis(12),
                started_at: chrono::Utc::now(),
                primary_failure: failure,
                secondary_failures: Vec::new(),
                categories: vec!["quick".to_string()],
            },
            output: vec!["captured line".to_string()],
        }
    }

    #[test]
    fn test_text_report_shape() {
        let summary = RunSummary {
            tests: vec![completed(Outcome::Passed, None)],
            duration: Duration::from_millis(1230),
        };
        let mut out = Vec::new();
        print_text(&mut out, &summary).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("passed"));
        assert!(text.contains("demo::Widget::build"));
        assert!(text.contains("> captured line"));
        assert!(text.contains("1 passed, 0 failed"));
    }

    #[test]
    fn test_json_report_shape() {
        let failure = Failure::timeout("demo::Widget", "build", Duration::from_millis(50));
        let summary = RunSummary {
            tests: vec![completed(Outcome::Timeout, Some(failure))],
            duration: Duration::from_millis(80),
        };
        let mut out = Vec::new();
        print_json(&mut out, &summary).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc["summary"]["total"], 1);
        assert_eq!(doc["summary"]["timedOut"], 1);
        assert_eq!(doc["tests"][0]["name"], "demo::Widget::build");
        assert_eq!(doc["tests"][0]["outcome"], "timeout");
        assert!(doc["tests"][0]["failure"]["message"]
            .as_str()
            .unwrap()
            .contains("exceeded execution timeout period"));
    }
}
