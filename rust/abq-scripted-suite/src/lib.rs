//! A data-driven test framework for the ABQ native runner.
//!
//! [`ScriptedSuite`] loads a suite description from JSON and implements
//! [`abq_native_runner::TestFramework`] over it. [`FakeWorker`] and
//! [`ScriptedStream`] play the worker's side of the protocol.

#![forbid(unsafe_code)]

mod error;
mod fake_worker;
mod suite;

pub use error::*;
pub use fake_worker::*;
pub use suite::*;
