#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
mod error;
mod execution;
mod host;
pub mod logging;
pub mod manifest;
mod metadata;
pub mod ordering;
mod reporter;
pub mod scope;
mod session;
mod test_case;
mod traversal;
pub mod worker;

pub use error::*;
pub use execution::*;
pub use host::*;
pub use metadata::*;
pub use reporter::*;
pub use session::*;
pub use test_case::*;

pub use config::{Activation, LaunchConfig};
pub use ordering::{GlobalOrdering, Ordering, OrderingStrategy};
pub use worker::{RunOutcome, drive, run_worker};

/// Name this adapter reports in its runner specification.
pub const RUNNER_NAME: &str = "abq-native-runner";
