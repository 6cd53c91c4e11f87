//! Full protocol runs against a scripted suite over an in-memory stream.

use abq_native_runner::{
    HARD_FAILURE_EXIT_CODE, RunOutcome, RunSummary, TestFramework, WorkerError, drive,
};
use abq_protocol::{InitMessage, InitMeta, TestStatus};
use abq_scripted_suite::{Event, ScriptedStream, ScriptedSuite, Transcript};
use serde_json::{Value, json};

fn suite(value: Value) -> ScriptedSuite {
    ScriptedSuite::new(serde_json::from_value(value).unwrap()).unwrap()
}

fn defined(seed: u64) -> InitMessage {
    InitMessage::with_meta(InitMeta {
        ordering: "defined".into(),
        seed,
    })
}

fn run(
    suite: &mut ScriptedSuite,
    init: &InitMessage,
    ids: &[&str],
) -> (Result<RunOutcome, WorkerError>, Transcript) {
    let mut stream = ScriptedStream::run(init, ids.iter().copied()).unwrap();
    let outcome = drive(&mut stream, suite, false);
    (outcome, stream.transcript())
}

fn before_alls(suite: &ScriptedSuite, id: &str) -> usize {
    suite
        .events()
        .iter()
        .filter(|event| **event == Event::BeforeAll(id.to_owned()))
        .count()
}

/// ./math_spec.rb[1] "Math"
///   [1:1] adds          (pass)
///   [1:2] multiplies    (fail)
///   [1:3] "nested"
///     [1:3:1] deep      (pass)
///     [1:3:2] deeper    (pass)
/// ./io_spec.rb[1] "IO"
///   [1:1] reads         (pass)
fn two_files() -> Value {
    json!({
        "seed": 1,
        "files": [
            {"path": "./math_spec.rb", "groups": [{
                "description": "Math",
                "members": [
                    {"test": {"description": "adds"}},
                    {"test": {"description": "multiplies", "behavior": {"type": "fail", "message": "expected 6, got 5"}}},
                    {"group": {"description": "nested", "members": [
                        {"test": {"description": "deep"}},
                        {"test": {"description": "deeper"}}
                    ]}}
                ]
            }]},
            {"path": "./io_spec.rb", "groups": [{
                "description": "IO",
                "members": [{"test": {"description": "reads"}}]
            }]}
        ]
    })
}

#[test]
fn one_pass_one_fail_reports_both_and_fails_the_run() {
    let mut suite = suite(two_files());
    let (outcome, transcript) = run(
        &mut suite,
        &defined(1),
        &["./math_spec.rb[1:1]", "./math_spec.rb[1:2]"],
    );
    let outcome = outcome.unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Completed(RunSummary {
            all_passed: false,
            tests_reported: 2,
            protocol_violation: None,
        })
    );
    assert_eq!(outcome.exit_code(suite.failure_exit_code()), 1);
    assert!(transcript.init_acknowledged);
    assert_eq!(
        transcript.result_ids(),
        vec!["./math_spec.rb[1:1]", "./math_spec.rb[1:2]"]
    );
    assert_eq!(transcript.results[0].status, TestStatus::Success);
    assert!(matches!(
        &transcript.results[1].status,
        TestStatus::Failure { exception, .. } if exception == "ExpectationNotMetError"
    ));
    assert_eq!(
        transcript.results[1].lineage,
        vec!["Math".to_owned(), "multiplies".to_owned()]
    );

    // Only the targeted tests ran; nothing from the nested group or the
    // other file.
    assert_eq!(
        suite.tests_run(),
        vec!["./math_spec.rb[1:1]", "./math_spec.rb[1:2]"]
    );
    assert_eq!(before_alls(&suite, "./math_spec.rb[1:3]"), 0);
    assert_eq!(before_alls(&suite, "./io_spec.rb[1]"), 0);
}

#[test]
fn spawn_message_comes_first() {
    let mut suite = suite(two_files());
    let (_, transcript) = run(&mut suite, &InitMessage::fast_exit(), &[]);
    let spawned = transcript.spawned.unwrap();
    assert_eq!(spawned.runner_specification.name, "abq-native-runner");
    assert_eq!(
        spawned.runner_specification.test_framework,
        "abq-scripted-suite"
    );
    assert_eq!(spawned.protocol_version.major, 0);
    assert_eq!(spawned.protocol_version.minor, 2);
}

#[test]
fn before_all_failure_fails_every_targeted_test() {
    let mut suite = suite(json!({
        "seed": 1,
        "files": [{"path": "./db_spec.rb", "groups": [{
            "description": "DB",
            "before_all": {"type": "raise", "class": "ConnectionError", "message": "db down"},
            "members": [
                {"test": {"description": "one"}},
                {"test": {"description": "two"}},
                {"test": {"description": "three"}}
            ]
        }]}]
    }));
    let ids = ["./db_spec.rb[1:1]", "./db_spec.rb[1:2]", "./db_spec.rb[1:3]"];
    let (outcome, transcript) = run(&mut suite, &defined(1), &ids);
    let outcome = outcome.unwrap();

    assert_eq!(transcript.result_ids(), ids.to_vec());
    for result in &transcript.results {
        assert!(matches!(
            &result.status,
            TestStatus::Error { exception, .. } if exception == "ConnectionError"
        ));
        assert!(result.output.as_deref().unwrap_or("").contains("db down"));
    }
    // Three directives consumed, then the end marker: no violation.
    assert_eq!(
        outcome,
        RunOutcome::Completed(RunSummary {
            all_passed: false,
            tests_reported: 3,
            protocol_violation: None,
        })
    );
    assert!(suite.tests_run().is_empty());
    assert_eq!(
        suite.events(),
        &[
            Event::BeforeSuite,
            Event::BeforeAll("./db_spec.rb[1]".into()),
            Event::AfterAll("./db_spec.rb[1]".into()),
            Event::AfterSuite,
        ]
    );
}

#[test]
fn fast_exit_runs_nothing() {
    let mut suite = suite(two_files());
    let (outcome, transcript) = run(&mut suite, &InitMessage::fast_exit(), &[]);
    let outcome = outcome.unwrap();

    assert_eq!(outcome, RunOutcome::FastExit);
    assert_eq!(outcome.exit_code(1), 0);
    assert!(transcript.init_acknowledged);
    assert!(transcript.results.is_empty());
    assert!(suite.events().is_empty());
}

#[test]
fn manifest_replayed_as_directives_visits_every_test_once() {
    let spec = json!({
        "seed": 42,
        "order": "random",
        "files": [
            {"path": "./a_spec.rb", "groups": [
                {"description": "A", "members": [
                    {"test": {"description": "a1"}},
                    {"test": {"description": "a2"}},
                    {"group": {"description": "A inner", "members": [
                        {"test": {"description": "a3"}},
                        {"test": {"description": "a4"}},
                        {"test": {"description": "a5"}}
                    ]}},
                    {"test": {"description": "a6"}}
                ]},
                {"description": "A2", "members": [
                    {"test": {"description": "b1"}},
                    {"group": {"description": "empty"}}
                ]}
            ]},
            {"path": "./c_spec.rb", "groups": [
                {"description": "C", "members": [
                    {"test": {"description": "c1"}},
                    {"test": {"description": "c2"}}
                ]}
            ]}
        ]
    });

    let mut generator = suite(spec.clone());
    let mut stream = ScriptedStream::new();
    assert_eq!(
        drive(&mut stream, &mut generator, true).unwrap(),
        RunOutcome::ManifestGenerated
    );
    let manifest = stream.transcript().manifest.unwrap();
    assert!(generator.tests_run().is_empty());
    assert_eq!(manifest.init_meta.ordering, "random");
    assert_eq!(manifest.init_meta.seed, 42);

    let ids = manifest.flatten();
    assert_eq!(ids.len(), 9);

    // A runner that starts with a different seed adopts the shared one.
    let mut runner = suite(spec);
    runner.set_seed(7);
    let (outcome, transcript) = run(&mut runner, &InitMessage::with_meta(manifest.init_meta.clone()), &ids);

    assert_eq!(runner.seed(), 42);
    assert_eq!(transcript.result_ids(), ids);
    assert_eq!(runner.tests_run(), ids);
    assert!(matches!(
        outcome.unwrap(),
        RunOutcome::Completed(RunSummary { all_passed: true, tests_reported: 9, protocol_violation: None })
    ));
    for group in ["./a_spec.rb[1]", "./a_spec.rb[1:3]", "./a_spec.rb[2]", "./c_spec.rb[1]"] {
        assert_eq!(before_alls(&runner, group), 1, "{group}");
    }
    assert_eq!(before_alls(&runner, "./a_spec.rb[2:2]"), 0);
}

#[test]
fn fail_fast_is_a_hard_failure() {
    let mut suite = suite(two_files());
    suite.set_fail_fast(true);
    let (outcome, transcript) = run(&mut suite, &defined(1), &["./math_spec.rb[1:1]"]);

    let err = outcome.unwrap_err();
    assert!(matches!(err, WorkerError::UnsupportedConfiguration(_)));
    assert_eq!(err.exit_code(), HARD_FAILURE_EXIT_CODE);
    assert!(transcript.spawned.is_some());
    assert!(!transcript.init_acknowledged);
    assert!(transcript.results.is_empty());
    assert!(suite.events().is_empty());
}

#[test]
fn custom_orderings_cannot_produce_a_manifest() {
    let mut suite = suite(two_files());
    suite.set_order("by_size");
    let mut stream = ScriptedStream::new();
    let err = drive(&mut stream, &mut suite, true).unwrap_err();
    assert!(matches!(err, WorkerError::UnsupportedOrdering(ref name) if name == "by_size"));
    assert_eq!(
        err.to_string(),
        "can't order based on unknown ordering: `by_size`"
    );
    assert!(stream.transcript().manifest.is_none());
}

#[test]
fn unknown_init_ordering_is_a_hard_failure() {
    let mut suite = suite(two_files());
    let init = InitMessage::with_meta(InitMeta {
        ordering: "by_size".into(),
        seed: 1,
    });
    let (outcome, _) = run(&mut suite, &init, &["./math_spec.rb[1:1]"]);
    assert!(matches!(
        outcome.unwrap_err(),
        WorkerError::UnsupportedOrdering(_)
    ));
    assert!(suite.tests_run().is_empty());
}

#[test]
fn unknown_directive_is_a_protocol_violation() {
    let mut suite = suite(two_files());
    let (outcome, transcript) = run(&mut suite, &defined(1), &["./missing_spec.rb[1:1]"]);
    let outcome = outcome.unwrap();

    let RunOutcome::Completed(summary) = &outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert!(summary.protocol_violation.is_some());
    assert_eq!(outcome.exit_code(1), HARD_FAILURE_EXIT_CODE);
    assert!(transcript.results.is_empty());
}

#[test]
fn unscoped_directive_is_a_leftover_not_the_end() {
    let mut suite = suite(two_files());
    let (outcome, transcript) = run(
        &mut suite,
        &defined(1),
        &["./math_spec.rb[1:1]", "garbage", "./math_spec.rb[1:2]"],
    );
    let outcome = outcome.unwrap();

    let RunOutcome::Completed(summary) = &outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(summary.tests_reported, 1);
    let leftover = summary.protocol_violation.as_deref().unwrap();
    assert!(leftover.contains("garbage"), "{leftover}");
    assert_eq!(outcome.exit_code(1), HARD_FAILURE_EXIT_CODE);
    assert_eq!(transcript.result_ids(), vec!["./math_spec.rb[1:1]"]);
}

#[test]
fn opaque_scope_segments_match_nothing_in_a_numbered_suite() {
    let mut suite = suite(two_files());
    let (outcome, transcript) = run(&mut suite, &defined(1), &["./math_spec.rb[x:y]"]);
    let outcome = outcome.unwrap();

    let RunOutcome::Completed(summary) = &outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(summary.tests_reported, 0);
    assert!(summary.protocol_violation.is_some());
    assert_eq!(outcome.exit_code(1), HARD_FAILURE_EXIT_CODE);
    assert!(transcript.results.is_empty());
}

#[test]
fn group_id_as_directive_is_an_internal_error() {
    let mut suite = suite(two_files());
    let (outcome, transcript) = run(&mut suite, &defined(1), &["./math_spec.rb[1:3]"]);

    let err = outcome.unwrap_err();
    assert!(matches!(err, WorkerError::Internal(_)), "{err}");
    assert_eq!(err.exit_code(), HARD_FAILURE_EXIT_CODE);
    assert!(transcript.results.is_empty());
    assert!(suite.tests_run().is_empty());
}

#[test]
fn out_of_order_directives_are_a_protocol_violation() {
    let mut suite = suite(two_files());
    let (outcome, transcript) = run(
        &mut suite,
        &defined(1),
        &["./io_spec.rb[1:1]", "./math_spec.rb[1:1]"],
    );
    // The io file is walked after math, so math's test is never reached
    // again once the first directive has moved past it.
    assert_eq!(transcript.result_ids(), vec!["./io_spec.rb[1:1]"]);
    assert_eq!(
        outcome.unwrap().exit_code(1),
        HARD_FAILURE_EXIT_CODE
    );
}

#[test]
fn group_skip_marks_tests_skipped_without_failing() {
    let mut suite = suite(json!({
        "seed": 1,
        "files": [{"path": "./slow_spec.rb", "groups": [{
            "description": "Slow",
            "before_all": {"type": "skip", "reason": "too slow"},
            "members": [
                {"test": {"description": "one"}},
                {"group": {"description": "inner", "members": [{"test": {"description": "two"}}]}}
            ]
        }]}]
    }));
    let ids = ["./slow_spec.rb[1:1]", "./slow_spec.rb[1:2:1]"];
    let (outcome, transcript) = run(&mut suite, &defined(1), &ids);

    assert_eq!(transcript.result_ids(), ids.to_vec());
    assert!(transcript.results.iter().all(|r| r.status == TestStatus::Skipped));
    assert_eq!(
        transcript.results[1].lineage,
        vec!["Slow".to_owned(), "inner".to_owned(), "two".to_owned()]
    );
    assert_eq!(outcome.unwrap().exit_code(1), 0);
}

#[test]
fn escaping_test_fails_the_rest_of_its_group() {
    let mut suite = suite(json!({
        "seed": 1,
        "files": [{"path": "./x_spec.rb", "groups": [
            {"description": "X", "members": [
                {"test": {"description": "fine"}},
                {"test": {"description": "explodes", "behavior": {"type": "escape", "class": "SystemStackError", "message": "stack level too deep"}}},
                {"test": {"description": "after"}},
                {"group": {"description": "child", "members": [{"test": {"description": "nested"}}]}}
            ]},
            {"description": "Y", "members": [{"test": {"description": "unaffected"}}]}
        ]}]
    }));
    let ids = [
        "./x_spec.rb[1:1]",
        "./x_spec.rb[1:2]",
        "./x_spec.rb[1:3]",
        "./x_spec.rb[1:4:1]",
        "./x_spec.rb[2:1]",
    ];
    let (outcome, transcript) = run(&mut suite, &defined(1), &ids);

    assert_eq!(transcript.result_ids(), ids.to_vec());
    assert_eq!(transcript.results[0].status, TestStatus::Success);
    for result in &transcript.results[1..4] {
        assert!(matches!(
            &result.status,
            TestStatus::Error { exception, .. } if exception == "SystemStackError"
        ));
    }
    assert_eq!(transcript.results[4].status, TestStatus::Success);
    assert_eq!(
        suite.tests_run(),
        vec!["./x_spec.rb[1:1]", "./x_spec.rb[1:2]", "./x_spec.rb[2:1]"]
    );
    assert_eq!(outcome.unwrap().exit_code(1), 1);
}

#[test]
fn ordering_and_seed_come_from_init() {
    let mut suite = suite(two_files());
    let init = InitMessage::with_meta(InitMeta {
        ordering: "recently_modified".into(),
        seed: 99,
    });
    let (outcome, _) = run(&mut suite, &init, &[]);
    outcome.unwrap();
    assert_eq!(suite.seed(), 99);
    assert_eq!(
        suite.global_ordering(),
        abq_native_runner::GlobalOrdering::Supported(abq_native_runner::Ordering::RecentlyModified)
    );
    assert!(!suite.persists_status());
}

#[test]
fn results_carry_metadata_output_and_retries() {
    let mut suite = suite(json!({
        "seed": 1,
        "files": [{"path": "./r_spec.rb", "groups": [{
            "description": "R",
            "metadata": {"team": "core"},
            "members": [
                {"test": {"description": "retried", "line": 12, "metadata": {"flaky": true},
                          "output": "hi\n", "behavior": {"type": "flaky", "failures": 2}}},
                {"test": {"description": "later", "behavior": {"type": "pending", "reason": "todo"}}}
            ]
        }]}]
    }));
    let (_, transcript) = run(&mut suite, &defined(1), &["./r_spec.rb[1:1]", "./r_spec.rb[1:2]"]);

    let retried = &transcript.results[0];
    assert_eq!(retried.status, TestStatus::Success);
    assert_eq!(retried.tags, vec!["flaky".to_owned()]);
    assert_eq!(retried.meta.get("team"), Some(&json!("core")));
    assert!(retried.meta.get("scoped_id").is_none());
    assert_eq!(retried.location.line, 12);
    assert_eq!(retried.display_name, "R retried");
    assert_eq!(retried.output.as_deref(), Some("hi\n"));
    assert_eq!(retried.past_attempts.len(), 2);
    assert!(retried.started_at.ends_with('Z'));

    assert_eq!(transcript.results[1].status, TestStatus::Pending);
}

#[test]
fn before_suite_failure_runs_nothing() {
    let mut spec = two_files();
    spec["before_suite"] = json!({"class": "LoadError", "message": "cannot load helper"});
    let mut suite = suite(spec);
    let (outcome, transcript) = run(&mut suite, &defined(1), &["./math_spec.rb[1:1]"]);
    let outcome = outcome.unwrap();

    assert!(transcript.results.is_empty());
    assert!(suite.tests_run().is_empty());
    assert_eq!(outcome.exit_code(suite.failure_exit_code()), 1);
}
