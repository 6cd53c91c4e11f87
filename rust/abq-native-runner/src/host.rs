//! The host framework capability interface and the loaded test tree.
//!
//! The adapter never reaches into a framework's internals. A framework
//! exposes its loaded suite as a [`TestTree`] and lets the adapter run one
//! test or one group hook at a time through [`TestFramework`].

use std::collections::BTreeSet;
use std::time::SystemTime;

use abq_protocol::{Location, Meta};

use crate::execution::{Execution, Interrupt, Raised};
use crate::ordering::{GlobalOrdering, Ordering, Orderable};
use crate::scope::NodeAddress;

/// Descriptive fields of the runner specification that come from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkInfo {
    pub test_framework: String,
    pub test_framework_version: String,
    pub language: String,
    pub language_version: String,
    pub host: String,
}

/// A loaded, filtered suite: top-level groups in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestTree {
    pub groups: Vec<GroupNode>,
}

impl TestTree {
    pub fn new(groups: Vec<GroupNode>) -> Self {
        Self { groups }
    }

    /// Every source file a group or test was declared in.
    pub fn source_files(&self) -> BTreeSet<&str> {
        let mut files = BTreeSet::new();
        for group in &self.groups {
            group.collect_source_files(&mut files);
        }
        files
    }

    pub fn test_count(&self) -> usize {
        self.groups.iter().map(GroupNode::test_count).sum()
    }
}

/// A group of tests (`describe` / `context`).
#[derive(Debug, Clone, PartialEq)]
pub struct GroupNode {
    pub id: String,
    pub address: NodeAddress,
    pub description: String,
    pub metadata: Meta,
    /// Per-group override of the global ordering.
    pub ordering: Option<Ordering>,
    /// Tests that survived the framework's filtering, in declaration order.
    pub tests: Vec<TestNode>,
    pub children: Vec<GroupNode>,
}

impl GroupNode {
    pub fn new(address: NodeAddress, description: impl Into<String>) -> Self {
        Self {
            id: address.id(),
            address,
            description: description.into(),
            metadata: Meta::new(),
            ordering: None,
            tests: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Whether any test survives filtering in this group or below.
    pub fn has_tests(&self) -> bool {
        !self.tests.is_empty() || self.children.iter().any(GroupNode::has_tests)
    }

    pub fn test_count(&self) -> usize {
        self.tests.len() + self.children.iter().map(GroupNode::test_count).sum::<usize>()
    }

    fn collect_source_files<'a>(&'a self, files: &mut BTreeSet<&'a str>) {
        files.insert(&self.address.file);
        for test in &self.tests {
            files.insert(&test.location.file);
        }
        for child in &self.children {
            child.collect_source_files(files);
        }
    }
}

impl Orderable for GroupNode {
    fn ordering_id(&self) -> &str {
        &self.id
    }

    fn source_file(&self) -> &str {
        &self.address.file
    }
}

/// A single test (`it`).
#[derive(Debug, Clone, PartialEq)]
pub struct TestNode {
    pub id: String,
    pub address: NodeAddress,
    pub description: String,
    /// Descriptions of every enclosing group and the test, space separated.
    pub full_description: String,
    pub metadata: Meta,
    pub location: Location,
}

impl TestNode {
    pub fn new(
        address: NodeAddress,
        description: impl Into<String>,
        full_description: impl Into<String>,
        line: u32,
    ) -> Self {
        let location = Location {
            file: address.file.clone(),
            line,
        };
        Self {
            id: address.id(),
            address,
            description: description.into(),
            full_description: full_description.into(),
            metadata: Meta::new(),
            location,
        }
    }
}

impl Orderable for TestNode {
    fn ordering_id(&self) -> &str {
        &self.id
    }

    fn source_file(&self) -> &str {
        &self.location.file
    }
}

/// What the adapter needs from a host test framework.
///
/// The framework keeps its own execution engine: instantiating test
/// contexts, running `around`/`before`/`after` hooks for a single test,
/// assertions, and output capture all stay behind [`run_test`].
///
/// [`run_test`]: TestFramework::run_test
pub trait TestFramework {
    fn info(&self) -> FrameworkInfo;

    /// Stop on first failure. Incompatible with externally driven runs.
    fn fail_fast(&self) -> bool;

    /// Exit code for a run with failing tests.
    fn failure_exit_code(&self) -> i32 {
        1
    }

    fn seed(&self) -> u64;

    fn set_seed(&mut self, seed: u64);

    fn global_ordering(&self) -> GlobalOrdering;

    fn set_global_ordering(&mut self, ordering: Ordering);

    /// Stop the framework from persisting per-test status between runs; a
    /// selective run would record every unrun test.
    fn disable_status_persistence(&mut self) {}

    /// The loaded, filtered suite. Nothing is executed.
    fn load_tree(&self) -> TestTree;

    fn file_modified_at(&self, _file: &str) -> Option<SystemTime> {
        None
    }

    fn before_suite(&mut self) -> Result<(), Raised> {
        Ok(())
    }

    fn after_suite(&mut self) {}

    /// Run `group`'s "before all" hooks.
    fn before_all(&mut self, group: &GroupNode) -> Result<(), Interrupt>;

    /// Run `group`'s "after all" hooks. Failures here are the framework's to
    /// report; they do not change any test's result.
    fn after_all(&mut self, group: &GroupNode);

    /// Run one test to completion, including its per-test hooks.
    ///
    /// Failures inside the test are an [`Execution`] with a failed outcome.
    /// `Err` is reserved for interrupts that escape the test's own
    /// boundary.
    fn run_test(&mut self, group: &GroupNode, test: &TestNode) -> Result<Execution, Interrupt>;

    /// The framework's own unmodified full run, used when the adapter is
    /// inactive. Returns the process exit code.
    fn run_natively(&mut self) -> i32;
}
