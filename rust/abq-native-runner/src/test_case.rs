//! The test case the worker currently wants a result for.

use std::fmt;

use abq_protocol::{Meta, TestCaseMessage};

use crate::scope::{self, NodeAddress};
use crate::WorkerError;

/// Id carried by the end marker. Parses to the sentinel scope.
const END_MARKER_ID: &str = "[]";

/// Target of the selective runner.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    id: String,
    tags: Vec<String>,
    meta: Meta,
    address: NodeAddress,
    end_of_stream: bool,
}

impl TestCase {
    pub fn new(id: impl Into<String>, tags: Vec<String>, meta: Meta) -> Self {
        let id = id.into();
        let address = NodeAddress::parse_id(&id);
        Self {
            id,
            tags,
            meta,
            address,
            end_of_stream: false,
        }
    }

    /// Faux test case standing in for the closed directive stream. Never
    /// matches any group or test because its scope is empty.
    pub fn end_marker() -> Self {
        Self {
            end_of_stream: true,
            ..Self::new(END_MARKER_ID, Vec::new(), Meta::new())
        }
    }

    /// Only the closed stream ends the run. A directive whose id has no
    /// scope matches nothing but is still a test the worker is waiting on.
    pub fn is_end_marker(&self) -> bool {
        self.end_of_stream
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// The target lives somewhere under `group`.
    pub fn in_group(&self, group: &NodeAddress) -> bool {
        group.contains(&self.address)
    }

    /// The target is one of `group`'s own tests rather than a descendant of
    /// one of its child groups.
    pub fn directly_in_group(&self, group: &NodeAddress) -> Result<bool, WorkerError> {
        if !self.in_group(group) {
            return Ok(false);
        }
        if self.address.scope == group.scope {
            return Err(WorkerError::Internal(format!(
                "{} names the group {group} itself, not a test inside it",
                self.id
            )));
        }
        Ok(scope::directly_contains(&group.scope, &self.address.scope)?)
    }

    /// The target is exactly this test.
    pub fn is_test(&self, test: &NodeAddress) -> bool {
        self.address.matches(test)
    }
}

impl From<TestCaseMessage> for TestCase {
    fn from(message: TestCaseMessage) -> Self {
        let spec = message.test_case;
        Self::new(spec.id, spec.tags, spec.meta)
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Test case id: {}, tags: {:?}, meta: {}",
            self.id,
            self.tags,
            serde_json::Value::Object(self.meta.clone())
        )
    }
}
