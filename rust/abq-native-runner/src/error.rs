//! Error types.

use std::fmt;
use std::io;

/// Exit code for failures that are not test failures: unsupported
/// configuration, unsupported ordering, connection trouble, protocol
/// violations. Distinct from the framework's ordinary failure exit code.
pub const HARD_FAILURE_EXIT_CODE: i32 = 2;

/// Everything that can stop a native runner outside of ordinary test failures.
///
/// Test failures are data: they travel as results and never appear here.
#[derive(Debug)]
pub enum WorkerError {
    /// Could not establish the initial connection to the worker.
    ConnectionFailed { addr: String, source: io::Error },
    /// An established connection failed during a read or write.
    ConnectionBroken(io::Error),
    /// A frame arrived intact but its JSON did not decode as expected.
    MalformedMessage(serde_json::Error),
    /// The host framework is configured in a way selective runs cannot honor.
    UnsupportedConfiguration(String),
    /// An ordering strategy outside the supported set.
    UnsupportedOrdering(String),
    /// The worker and runner disagree about where the run is.
    ProtocolViolation(String),
    /// A traversal invariant did not hold.
    Internal(String),
}

impl WorkerError {
    pub fn exit_code(&self) -> i32 {
        HARD_FAILURE_EXIT_CODE
    }

    /// Whether the socket can no longer be used.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::ConnectionBroken(_)
        )
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { addr, source } => {
                write!(f, "unable to connect to ABQ socket {addr}: {source}")
            }
            Self::ConnectionBroken(e) => write!(f, "connection to ABQ worker broken: {e}"),
            Self::MalformedMessage(e) => write!(f, "malformed message from ABQ worker: {e}"),
            Self::UnsupportedConfiguration(msg) => write!(f, "unsupported configuration: {msg}"),
            Self::UnsupportedOrdering(name) => {
                write!(f, "can't order based on unknown ordering: `{name}`")
            }
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConnectionFailed { source, .. } => Some(source),
            Self::ConnectionBroken(e) => Some(e),
            Self::MalformedMessage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerError {
    fn from(e: io::Error) -> Self {
        Self::ConnectionBroken(e)
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedMessage(e)
    }
}

impl From<ScopeError> for WorkerError {
    fn from(e: ScopeError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// A containment query was made for scopes that are not nested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeError {
    pub outer: String,
    pub inner: String,
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scope [{}] is not inside [{}], but we thought it was",
            self.inner, self.outer
        )
    }
}

impl std::error::Error for ScopeError {}
