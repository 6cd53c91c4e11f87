//! Encoding completed executions as wire results.

use abq_protocol::{AttemptStatus, Meta, PastAttempt, TestResult, TestStatus};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::execution::{Execution, FailureKind, Outcome, Raised, runtime_nanos};
use crate::host::TestNode;
use crate::metadata::extract_metadata_and_tags;

/// Build the result for one completed test.
///
/// `lineage` holds the descriptions of the enclosing groups, outermost
/// first; the test's own description is appended.
pub fn encode_result(test: &TestNode, lineage: &[String], execution: &Execution) -> TestResult {
    let (tags, meta) = extract_metadata_and_tags(&test.metadata);
    let display_name = test.full_description.clone();

    let output = match &execution.outcome {
        Outcome::Failed(raised) => Some(raised.fully_formatted(&display_name)),
        _ => execution.captured_output.clone(),
    };

    let past_attempts = execution
        .past_attempts
        .iter()
        .map(|raised| PastAttempt {
            status: AttemptStatus::Failure,
            id: test.id.clone(),
            display_name: display_name.clone(),
            output: Some(raised.fully_formatted(&display_name)),
            runtime: 0,
            meta: Meta::new(),
        })
        .collect();

    let mut lineage = lineage.to_vec();
    lineage.push(test.description.clone());

    TestResult {
        status: status(&execution.outcome),
        id: test.id.clone(),
        display_name,
        output,
        runtime: runtime_nanos(execution.run_time),
        tags,
        meta,
        location: test.location.clone(),
        started_at: timestamp(execution.started_at),
        finished_at: timestamp(execution.finished_at),
        lineage,
        past_attempts,
    }
}

fn status(outcome: &Outcome) -> TestStatus {
    match outcome {
        Outcome::Passed => TestStatus::Success,
        Outcome::Failed(raised) => failure_status(raised),
        Outcome::Pending { skipped: true, .. } => TestStatus::Skipped,
        Outcome::Pending { skipped: false, .. } => TestStatus::Pending,
    }
}

fn failure_status(raised: &Raised) -> TestStatus {
    let exception = raised.class_name().to_owned();
    let backtrace = raised.backtrace.clone();
    match raised.kind {
        FailureKind::ExpectationNotMet => TestStatus::Failure {
            exception,
            backtrace,
        },
        FailureKind::Error => TestStatus::Error {
            exception,
            backtrace,
        },
    }
}

/// ISO-8601, UTC, whole seconds.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::scope::NodeAddress;

    fn node() -> TestNode {
        let mut test = TestNode::new(
            NodeAddress::parse_id("./a_spec.rb[1:2]"),
            "adds numbers",
            "Calculator adds numbers",
            7,
        );
        test.metadata.insert("slow".into(), json!(true));
        test.metadata.insert("owner".into(), json!("math"));
        test.metadata.insert("line_number".into(), json!(7));
        test
    }

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn passing_test() {
        let execution =
            Execution::new(Outcome::Passed, started(), 1.25).with_captured_output("hello\n");
        let result = encode_result(&node(), &["Calculator".into()], &execution);

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "status": {"type": "success"},
                "id": "./a_spec.rb[1:2]",
                "display_name": "Calculator adds numbers",
                "output": "hello\n",
                "runtime": 1_250_000_000u64,
                "tags": ["slow"],
                "meta": {"owner": "math"},
                "location": {"file": "./a_spec.rb", "line": 7},
                "started_at": "2024-03-01T12:00:00Z",
                "finished_at": "2024-03-01T12:00:01Z",
                "lineage": ["Calculator", "adds numbers"],
            })
        );
    }

    #[test]
    fn assertion_failures_and_errors_are_distinguished() {
        let unmet = Raised::expectation_not_met("expected 2, got 3")
            .with_backtrace(vec!["./a_spec.rb:8".into()]);
        let result = encode_result(
            &node(),
            &[],
            &Execution::new(Outcome::Failed(unmet), started(), 0.0),
        );
        assert_eq!(
            result.status,
            TestStatus::Failure {
                exception: "ExpectationNotMetError".into(),
                backtrace: vec!["./a_spec.rb:8".into()],
            }
        );
        let output = result.output.unwrap();
        assert!(output.contains("Failure/Error:"));
        assert!(output.contains("expected 2, got 3"));

        let mut anonymous = Raised::error("", "boom");
        anonymous.class_name = None;
        let result = encode_result(
            &node(),
            &[],
            &Execution::new(Outcome::Failed(anonymous), started(), 0.0),
        );
        assert_eq!(
            result.status,
            TestStatus::Error {
                exception: "(anonymous error class)".into(),
                backtrace: vec![],
            }
        );
    }

    #[test]
    fn pending_is_split_from_skipped() {
        let pending = Outcome::Pending {
            skipped: false,
            reason: Some("not yet".into()),
        };
        let skipped = Outcome::Pending {
            skipped: true,
            reason: None,
        };
        let encode = |outcome| encode_result(&node(), &[], &Execution::new(outcome, started(), 0.0));
        assert_eq!(encode(pending).status, TestStatus::Pending);
        assert_eq!(encode(skipped).status, TestStatus::Skipped);
    }

    #[test]
    fn past_attempts_only_when_retried() {
        let plain = encode_result(&node(), &[], &Execution::new(Outcome::Passed, started(), 0.1));
        let value = serde_json::to_value(&plain).unwrap();
        assert!(value.get("past_attempts").is_none());

        let retried = Execution::new(Outcome::Passed, started(), 0.1)
            .with_past_attempts(vec![Raised::error("Timeout::Error", "slow")]);
        let result = encode_result(&node(), &[], &retried);
        assert_eq!(result.past_attempts.len(), 1);
        let attempt = &result.past_attempts[0];
        assert_eq!(attempt.status, AttemptStatus::Failure);
        let output = attempt.output.as_deref().unwrap();
        assert!(output.contains("Timeout::Error"), "{output}");
        assert_eq!(attempt.id, "./a_spec.rb[1:2]");
        assert_eq!(attempt.runtime, 0);
        assert!(attempt.meta.is_empty());
    }
}
