use std::fmt;
use std::io;

/// Errors loading a suite description.
#[derive(Debug)]
pub enum SuiteError {
    Io(io::Error),
    Json(serde_json::Error),
    /// The description parsed but does not describe a usable suite.
    Invalid(String),
}

impl fmt::Display for SuiteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "could not read suite: {e}"),
            Self::Json(e) => write!(f, "could not parse suite: {e}"),
            Self::Invalid(msg) => write!(f, "invalid suite: {msg}"),
        }
    }
}

impl std::error::Error for SuiteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<io::Error> for SuiteError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for SuiteError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
