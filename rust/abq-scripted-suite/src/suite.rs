//! A test framework whose suite is a JSON description.
//!
//! Every test declares its behavior up front (pass, fail, raise, skip, ...)
//! so a suite can reproduce any situation the adapter has to handle
//! without running real code. Ids follow the usual `file[1:2:3]` scheme:
//! groups and tests share one 1-based counter per parent, in declaration
//! order.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use abq_native_runner::scope::{NodeAddress, Scope};
use abq_native_runner::{
    Execution, FrameworkInfo, GlobalOrdering, GroupNode, Interrupt, Ordering, OrderingStrategy,
    Outcome, Raised, TestFramework, TestNode, TestTree,
};
use abq_protocol::Meta;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::SuiteError;

/// Metadata key a group uses to override the global ordering.
pub const ORDER_METADATA_KEY: &str = "order";

// =============================================================================
// Description format
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteSpec {
    /// Random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Global ordering name. Names outside the supported set are kept as
    /// custom orderings.
    #[serde(default = "default_order")]
    pub order: String,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub failure_exit_code: Option<i32>,
    /// Raised by the before-suite hook when present.
    #[serde(default)]
    pub before_suite: Option<ErrorSpec>,
    pub files: Vec<FileSpec>,
}

fn default_order() -> String {
    Ordering::Defined.name().to_owned()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSpec {
    pub path: String,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub modified_at: Option<u64>,
    pub groups: Vec<GroupSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    pub description: String,
    #[serde(default)]
    pub metadata: Meta,
    #[serde(default)]
    pub before_all: Hook,
    #[serde(default)]
    pub members: Vec<MemberSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberSpec {
    Test(TestSpec),
    Group(GroupSpec),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
    pub description: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub metadata: Meta,
    #[serde(default)]
    pub behavior: Behavior,
    /// Printed by the test while it runs.
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorSpec {
    /// `None` for an anonymous exception class.
    #[serde(default)]
    pub class: Option<String>,
    pub message: String,
}

impl ErrorSpec {
    fn raised(&self, location: &str) -> Raised {
        let mut raised = Raised::error(self.class.clone().unwrap_or_default(), &self.message)
            .with_backtrace(vec![location.to_owned()]);
        raised.class_name = self.class.clone();
        raised
    }
}

/// What a group's "before all" hook does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hook {
    #[default]
    Ok,
    Raise(ErrorSpec),
    Skip {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// What a test does when run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Behavior {
    #[default]
    Pass,
    /// An assertion is not met.
    Fail { message: String },
    /// Something else is raised inside the test.
    Error(ErrorSpec),
    Pending {
        #[serde(default)]
        reason: Option<String>,
    },
    Skip {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Raises past the test's own boundary, taking its group down.
    Escape(ErrorSpec),
    /// Declares the rest of the group skipped.
    SkipGroup {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Fails `failures` times, then passes on retry.
    Flaky { failures: u32 },
}

// =============================================================================
// The framework
// =============================================================================

/// Something the suite did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    BeforeSuite,
    AfterSuite,
    BeforeAll(String),
    AfterAll(String),
    Test(String),
}

#[derive(Debug, Clone)]
struct ScriptedTest {
    behavior: Behavior,
    output: Option<String>,
}

#[derive(Debug)]
pub struct ScriptedSuite {
    tree: TestTree,
    hooks: HashMap<String, Hook>,
    tests: HashMap<String, ScriptedTest>,
    modified_at: HashMap<String, SystemTime>,
    before_suite: Option<ErrorSpec>,
    seed: u64,
    ordering: GlobalOrdering,
    fail_fast: bool,
    failure_exit_code: i32,
    persist_status: bool,
    events: Vec<Event>,
}

impl ScriptedSuite {
    pub fn new(spec: SuiteSpec) -> Result<Self, SuiteError> {
        let mut suite = Self {
            tree: TestTree::default(),
            hooks: HashMap::new(),
            tests: HashMap::new(),
            modified_at: HashMap::new(),
            before_suite: spec.before_suite,
            seed: spec.seed.unwrap_or_else(random_seed),
            ordering: parse_global_ordering(&spec.order),
            fail_fast: spec.fail_fast,
            failure_exit_code: spec.failure_exit_code.unwrap_or(1),
            persist_status: true,
            events: Vec::new(),
        };

        let mut groups = Vec::new();
        for file in &spec.files {
            if file.path.is_empty() {
                return Err(SuiteError::Invalid("file path is empty".to_owned()));
            }
            if let Some(secs) = file.modified_at {
                suite.modified_at.insert(
                    file.path.clone(),
                    SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
                );
            }
            let mut line = 0;
            let root = NodeAddress::new(file.path.clone(), Scope::default());
            for (index, group) in file.groups.iter().enumerate() {
                let address = root.child(index + 1);
                groups.push(suite.build_group(group, address, &[], &Meta::new(), &mut line)?);
            }
        }
        suite.tree = TestTree::new(groups);
        tracing::debug!(tests = suite.tree.test_count(), "suite loaded");
        Ok(suite)
    }

    pub fn from_json(json: &str) -> Result<Self, SuiteError> {
        Self::new(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, SuiteError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn set_fail_fast(&mut self, fail_fast: bool) {
        self.fail_fast = fail_fast;
    }

    pub fn set_failure_exit_code(&mut self, code: i32) {
        self.failure_exit_code = code;
    }

    /// Set the global ordering by name; unknown names become custom
    /// orderings.
    pub fn set_order(&mut self, name: &str) {
        self.ordering = parse_global_ordering(name);
    }

    pub fn tree(&self) -> &TestTree {
        &self.tree
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Ids of the tests run so far, in order.
    pub fn tests_run(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Test(id) => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn persists_status(&self) -> bool {
        self.persist_status
    }

    fn build_group(
        &mut self,
        spec: &GroupSpec,
        address: NodeAddress,
        lineage: &[&str],
        inherited: &Meta,
        line: &mut u32,
    ) -> Result<GroupNode, SuiteError> {
        *line += 1;
        let mut group = GroupNode::new(address, spec.description.clone());
        group.metadata = inherited.clone();
        group.metadata.extend(spec.metadata.clone());
        group.ordering = group_ordering(&spec.metadata)?;
        add_framework_metadata(&mut group.metadata, &spec.description, &group.address, *line);
        self.hooks.insert(group.id.clone(), spec.before_all.clone());

        let mut lineage = lineage.to_vec();
        lineage.push(&spec.description);
        let user_metadata = {
            let mut meta = inherited.clone();
            meta.extend(spec.metadata.clone());
            meta
        };

        for (index, member) in spec.members.iter().enumerate() {
            let address = group.address.child(index + 1);
            match member {
                MemberSpec::Test(test) => {
                    *line += 1;
                    let line = test.line.unwrap_or(*line);
                    group
                        .tests
                        .push(self.build_test(test, address, &lineage, &user_metadata, line));
                }
                MemberSpec::Group(child) => {
                    let child = self.build_group(child, address, &lineage, &user_metadata, line)?;
                    group.children.push(child);
                }
            }
        }
        Ok(group)
    }

    fn build_test(
        &mut self,
        spec: &TestSpec,
        address: NodeAddress,
        lineage: &[&str],
        inherited: &Meta,
        line: u32,
    ) -> TestNode {
        let mut full_description = lineage.join(" ");
        full_description.push(' ');
        full_description.push_str(&spec.description);

        let mut test = TestNode::new(address, spec.description.clone(), full_description, line);
        test.metadata = inherited.clone();
        test.metadata.extend(spec.metadata.clone());
        add_framework_metadata(&mut test.metadata, &spec.description, &test.address, line);

        self.tests.insert(
            test.id.clone(),
            ScriptedTest {
                behavior: spec.behavior.clone(),
                output: spec.output.clone(),
            },
        );
        test
    }

    fn location(test: &TestNode) -> String {
        format!("{}:{}", test.location.file, test.location.line)
    }

    fn strategy(&self) -> OrderingStrategy {
        // Custom orderings are not implemented by this suite; native runs
        // fall back to declaration order.
        let ordering = self.ordering.supported().unwrap_or(Ordering::Defined);
        OrderingStrategy::new(ordering, self.seed).with_modification_times(
            self.modified_at
                .iter()
                .map(|(file, at)| (file.clone(), *at))
                .collect(),
        )
    }
}

fn parse_global_ordering(name: &str) -> GlobalOrdering {
    match name.parse::<Ordering>() {
        Ok(ordering) => GlobalOrdering::Supported(ordering),
        Err(_) => GlobalOrdering::Custom(name.to_owned()),
    }
}

fn group_ordering(metadata: &Meta) -> Result<Option<Ordering>, SuiteError> {
    match metadata.get(ORDER_METADATA_KEY) {
        None => Ok(None),
        Some(Value::String(name)) => name
            .parse::<Ordering>()
            .map(Some)
            .map_err(|e| SuiteError::Invalid(e.to_string())),
        Some(other) => Err(SuiteError::Invalid(format!(
            "`{ORDER_METADATA_KEY}` metadata must be a string, got {other}"
        ))),
    }
}

/// Keys the framework itself keeps on every node. Never reported.
fn add_framework_metadata(meta: &mut Meta, description: &str, address: &NodeAddress, line: u32) {
    meta.insert("description".into(), description.into());
    meta.insert("file_path".into(), address.file.clone().into());
    meta.insert("line_number".into(), line.into());
    meta.insert("scoped_id".into(), address.scope.to_string().into());
}

fn random_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos % 0xFFFF)
}

impl TestFramework for ScriptedSuite {
    fn info(&self) -> FrameworkInfo {
        FrameworkInfo {
            test_framework: "abq-scripted-suite".to_owned(),
            test_framework_version: env!("CARGO_PKG_VERSION").to_owned(),
            language: "rust".to_owned(),
            language_version: env!("CARGO_PKG_RUST_VERSION").to_owned(),
            host: format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS),
        }
    }

    fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    fn failure_exit_code(&self) -> i32 {
        self.failure_exit_code
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    fn global_ordering(&self) -> GlobalOrdering {
        self.ordering.clone()
    }

    fn set_global_ordering(&mut self, ordering: Ordering) {
        self.ordering = GlobalOrdering::Supported(ordering);
    }

    fn disable_status_persistence(&mut self) {
        self.persist_status = false;
    }

    fn load_tree(&self) -> TestTree {
        self.tree.clone()
    }

    fn file_modified_at(&self, file: &str) -> Option<SystemTime> {
        self.modified_at.get(file).copied()
    }

    fn before_suite(&mut self) -> Result<(), Raised> {
        self.events.push(Event::BeforeSuite);
        match &self.before_suite {
            Some(error) => Err(error.raised("before(:suite)")),
            None => Ok(()),
        }
    }

    fn after_suite(&mut self) {
        self.events.push(Event::AfterSuite);
    }

    fn before_all(&mut self, group: &GroupNode) -> Result<(), Interrupt> {
        self.events.push(Event::BeforeAll(group.id.clone()));
        match self.hooks.get(&group.id) {
            None | Some(Hook::Ok) => Ok(()),
            Some(Hook::Raise(error)) => {
                let location = format!("{}:{}", group.address.file, group.id);
                Err(Interrupt::Raise(error.raised(&location)))
            }
            Some(Hook::Skip { reason }) => Err(Interrupt::Skip {
                reason: reason.clone(),
            }),
        }
    }

    fn after_all(&mut self, group: &GroupNode) {
        self.events.push(Event::AfterAll(group.id.clone()));
    }

    fn run_test(&mut self, _group: &GroupNode, test: &TestNode) -> Result<Execution, Interrupt> {
        self.events.push(Event::Test(test.id.clone()));
        let started_at = Utc::now();
        let timer = Instant::now();
        let location = Self::location(test);

        let Some(scripted) = self.tests.get(&test.id) else {
            let raised = Raised::error("NameError", format!("no such test: {}", test.id));
            return Ok(Execution::new(Outcome::Failed(raised), started_at, 0.0));
        };

        let mut past_attempts = Vec::new();
        let outcome = match &scripted.behavior {
            Behavior::Pass => Outcome::Passed,
            Behavior::Fail { message } => Outcome::Failed(
                Raised::expectation_not_met(message).with_backtrace(vec![location]),
            ),
            Behavior::Error(error) => Outcome::Failed(error.raised(&location)),
            Behavior::Pending { reason } => Outcome::Pending {
                skipped: false,
                reason: reason.clone(),
            },
            Behavior::Skip { reason } => Outcome::Pending {
                skipped: true,
                reason: reason.clone(),
            },
            Behavior::Escape(error) => return Err(Interrupt::Raise(error.raised(&location))),
            Behavior::SkipGroup { reason } => {
                return Err(Interrupt::Skip {
                    reason: reason.clone(),
                });
            }
            Behavior::Flaky { failures } => {
                past_attempts = (1..=*failures)
                    .map(|attempt| {
                        Raised::expectation_not_met(format!("attempt {attempt} failed"))
                            .with_backtrace(vec![location.clone()])
                    })
                    .collect();
                Outcome::Passed
            }
        };

        let mut execution = Execution::new(outcome, started_at, timer.elapsed().as_secs_f64())
            .with_past_attempts(past_attempts);
        if let Some(output) = &scripted.output {
            execution = execution.with_captured_output(output.clone());
        }
        Ok(execution)
    }

    fn run_natively(&mut self) -> i32 {
        native::run(self)
    }
}

// =============================================================================
// Native run
// =============================================================================

mod native {
    use super::*;

    #[derive(Debug, Default)]
    struct Tally {
        examples: usize,
        failures: Vec<String>,
        pending: usize,
    }

    /// Run everything, print a summary, return the exit code.
    pub(super) fn run(suite: &mut ScriptedSuite) -> i32 {
        let strategy = suite.strategy();
        let tree = suite.tree.clone();

        if let Err(raised) = suite.before_suite() {
            println!("An error occurred in a `before(:suite)` hook.");
            println!("{}: {}", raised.class_name(), raised.message);
            return suite.failure_exit_code;
        }

        let mut tally = Tally::default();
        for group in strategy.order(&tree.groups, None) {
            if !run_group(suite, &strategy, group, &mut tally) {
                break;
            }
        }
        suite.after_suite();

        println!();
        for (n, failure) in tally.failures.iter().enumerate() {
            println!("  {}) {failure}", n + 1);
        }
        println!(
            "{} examples, {} failures, {} pending",
            tally.examples,
            tally.failures.len(),
            tally.pending
        );

        if tally.failures.is_empty() {
            0
        } else {
            suite.failure_exit_code
        }
    }

    /// Returns `false` once fail-fast wants the run stopped.
    fn run_group(
        suite: &mut ScriptedSuite,
        strategy: &OrderingStrategy,
        group: &GroupNode,
        tally: &mut Tally,
    ) -> bool {
        if !group.has_tests() {
            return true;
        }
        let keep_going = match suite.before_all(group) {
            Ok(()) => run_members(suite, strategy, group, tally),
            Err(interrupt) => {
                conclude(group, &interrupt, tally);
                !(suite.fail_fast && matches!(interrupt, Interrupt::Raise(_)))
            }
        };
        suite.after_all(group);
        keep_going
    }

    fn run_members(
        suite: &mut ScriptedSuite,
        strategy: &OrderingStrategy,
        group: &GroupNode,
        tally: &mut Tally,
    ) -> bool {
        for test in strategy.order(&group.tests, group.ordering) {
            tally.examples += 1;
            match suite.run_test(group, test) {
                Ok(execution) => match execution.outcome {
                    Outcome::Passed => {}
                    Outcome::Pending { .. } => tally.pending += 1,
                    Outcome::Failed(raised) => {
                        tally
                            .failures
                            .push(format!("{}: {}", test.full_description, raised.message));
                        if suite.fail_fast {
                            return false;
                        }
                    }
                },
                Err(interrupt) => {
                    tally.examples -= 1;
                    conclude(group, &interrupt, tally);
                    return !(suite.fail_fast && matches!(interrupt, Interrupt::Raise(_)));
                }
            }
        }
        for child in strategy.order(&group.children, group.ordering) {
            if !run_group(suite, strategy, child, tally) {
                return false;
            }
        }
        true
    }

    /// Count every test under `group` with the interrupt's outcome. Tests
    /// that already ran before the interrupt are counted again; the
    /// summary is approximate in that case.
    fn conclude(group: &GroupNode, interrupt: &Interrupt, tally: &mut Tally) {
        let count = group.test_count();
        tally.examples += count;
        match interrupt {
            Interrupt::Skip { .. } => tally.pending += count,
            Interrupt::Raise(raised) => {
                tally.failures.extend(
                    std::iter::repeat_n(&group.description, count)
                        .map(|description| format!("{description}: {}", raised.message)),
                );
            }
        }
    }
}
