//! ABQ native runner protocol wire types.
//!
//! This crate defines the JSON messages exchanged between an ABQ worker and a
//! native test runner. It is used by the runner adapter
//! (`abq-native-runner`) and by the fake worker in `abq-scripted-suite`.
//!
//! Every message travels as a 4-byte big-endian length prefix followed by
//! the UTF-8 JSON body. Framing lives in the adapter; this crate only knows
//! the shapes.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Free-form metadata attached to tests, groups, and directives.
pub type Meta = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Environment
// =============================================================================

/// Address (`host:port`) of the worker socket the runner must connect to.
pub const ABQ_SOCKET: &str = "ABQ_SOCKET";

/// Present when the worker wants this runner to emit a manifest and exit.
pub const ABQ_GENERATE_MANIFEST: &str = "ABQ_GENERATE_MANIFEST";

/// Index of the runner within its worker, used to name debug logs.
pub const ABQ_RUNNER: &str = "ABQ_RUNNER";

// =============================================================================
// Handshake
// =============================================================================

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 0, minor: 2 };

/// `{type: abq_protocol_version, major, minor}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "abq_protocol_version")]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

/// Identity of the native runner, sent as part of the spawn message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "abq_native_runner_specification")]
pub struct NativeRunnerSpecification {
    pub name: String,
    pub version: String,
    pub test_framework: String,
    pub test_framework_version: String,
    pub language: String,
    pub language_version: String,
    pub host: String,
}

/// First message on every connection, written by the runner unconditionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "abq_native_runner_spawned")]
pub struct NativeRunnerSpawned {
    pub protocol_version: ProtocolVersion,
    pub runner_specification: NativeRunnerSpecification,
}

impl NativeRunnerSpawned {
    pub fn new(runner_specification: NativeRunnerSpecification) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            runner_specification,
        }
    }
}

// =============================================================================
// Initialization
// =============================================================================

/// Ordering and seed shared between every runner of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitMeta {
    /// Name of the ordering strategy (`defined`, `random`, `recently_modified`).
    pub ordering: String,
    pub seed: u64,
}

/// Worker → runner, read once before any test directive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_meta: Option<InitMeta>,
    /// No tests are assigned to this runner; it should exit successfully.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fast_exit: bool,
}

impl InitMessage {
    pub fn with_meta(init_meta: InitMeta) -> Self {
        Self {
            init_meta: Some(init_meta),
            fast_exit: false,
        }
    }

    pub fn fast_exit() -> Self {
        Self {
            init_meta: None,
            fast_exit: true,
        }
    }
}

/// Runner → worker acknowledgement of the init message. Serializes as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitSuccess {}

// =============================================================================
// Manifest
// =============================================================================

/// `{manifest: {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestMessage {
    pub manifest: Manifest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub init_meta: InitMeta,
    pub members: Vec<ManifestMember>,
}

/// A node of the manifest tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManifestMember {
    Test {
        id: String,
        tags: Vec<String>,
        meta: Meta,
    },
    Group {
        name: String,
        tags: Vec<String>,
        meta: Meta,
        members: Vec<ManifestMember>,
    },
}

impl Manifest {
    /// Every test id in execution order.
    pub fn flatten(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        for member in &self.members {
            member.collect_test_ids(&mut ids);
        }
        ids
    }
}

impl ManifestMember {
    fn collect_test_ids<'a>(&'a self, ids: &mut Vec<&'a str>) {
        match self {
            Self::Test { id, .. } => ids.push(id),
            Self::Group { members, .. } => {
                for member in members {
                    member.collect_test_ids(ids);
                }
            }
        }
    }
}

// =============================================================================
// Test directives
// =============================================================================

/// `{test_case: {id, tags, meta}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseMessage {
    pub test_case: TestCaseSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseSpec {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: Meta,
}

impl TestCaseMessage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            test_case: TestCaseSpec {
                id: id.into(),
                tags: Vec::new(),
                meta: Meta::new(),
            },
        }
    }
}

// =============================================================================
// Test results
// =============================================================================

/// `{test_result: {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultMessage {
    pub test_result: TestResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub status: TestStatus,
    pub id: String,
    pub display_name: String,
    pub output: Option<String>,
    /// Nanoseconds.
    pub runtime: u64,
    pub tags: Vec<String>,
    pub meta: Meta,
    pub location: Location,
    /// ISO-8601, UTC, second precision.
    pub started_at: String,
    pub finished_at: String,
    /// Descriptions from the outermost group down to the test itself.
    pub lineage: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub past_attempts: Vec<PastAttempt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestStatus {
    Success,
    /// An assertion was not met.
    Failure {
        exception: String,
        backtrace: Vec<String>,
    },
    /// Anything else was raised.
    Error {
        exception: String,
        backtrace: Vec<String>,
    },
    Pending,
    Skipped,
}

impl TestStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. } | Self::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
}

/// Status of a retried attempt. Always a bare failure; the exception lives
/// in the attempt's `output`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttemptStatus {
    Failure,
}

/// A failed attempt that was retried in-process before the final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PastAttempt {
    pub status: AttemptStatus,
    pub id: String,
    pub display_name: String,
    pub output: Option<String>,
    pub runtime: u64,
    pub meta: Meta,
}
