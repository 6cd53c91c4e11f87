//! The runner side of a worker connection.
//!
//! A [`Session`] owns the socket and the current target. It moves through
//! [`WorkerState`] in one direction only; every transition is logged.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::time::SystemTime;

use abq_protocol::{
    InitMessage, InitSuccess, ManifestMessage, NativeRunnerSpawned, NativeRunnerSpecification,
    TestCaseMessage, TestResult, TestResultMessage,
};

use crate::codec::{FramedStream, Incoming};
use crate::execution::Raised;
use crate::host::{FrameworkInfo, TestFramework, TestTree};
use crate::manifest;
use crate::ordering::{GlobalOrdering, Ordering, OrderingStrategy};
use crate::test_case::TestCase;
use crate::traversal::Traversal;
use crate::{RUNNER_NAME, WorkerError};

/// Where a session is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// The connection failed or was lost.
    Disconnected,
    Handshaking,
    ManifestGeneration,
    AwaitingInit,
    Running,
    /// Every root group has been walked; only the end marker may remain.
    Draining,
    Done,
}

/// What `initialize` decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initialized {
    /// Nothing is assigned to this runner.
    FastExit,
    /// Ready to run. `changed` is whether the ordering or seed was updated.
    Ready { changed: bool },
}

/// Totals of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Every reported test succeeded and the suite hooks did not raise.
    pub all_passed: bool,
    pub tests_reported: usize,
    /// Set when the directive stream did not end with the end marker.
    pub protocol_violation: Option<String>,
}

pub struct Session<S> {
    stream: FramedStream<S>,
    target: TestCase,
    state: WorkerState,
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("target", &self.target.id())
            .finish_non_exhaustive()
    }
}

impl<S: Read + Write> Session<S> {
    /// Wrap a freshly connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream: FramedStream::new(stream),
            target: TestCase::end_marker(),
            state: WorkerState::Handshaking,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// The test the worker currently wants a result for.
    pub fn target(&self) -> &TestCase {
        &self.target
    }

    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::info!(from = ?self.state, to = ?next, "worker state");
        self.state = next;
    }

    fn write<T: serde::Serialize>(&mut self, message: &T) -> Result<(), WorkerError> {
        self.stream.write(message).inspect_err(|e| self.lost(e))
    }

    fn read<T: serde::de::DeserializeOwned>(&mut self) -> Result<Incoming<T>, WorkerError> {
        self.stream.read().inspect_err(|e| self.lost(e))
    }

    fn lost(&mut self, error: &WorkerError) {
        if error.is_connection_error() {
            tracing::error!(%error, state = ?self.state, "lost connection to ABQ worker");
            self.state = WorkerState::Disconnected;
        }
    }

    /// Send the spawn message. Always the first write on a connection.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn handshake(&mut self, info: FrameworkInfo) -> Result<(), WorkerError> {
        let spawned = NativeRunnerSpawned::new(runner_specification(info));
        tracing::debug!(?spawned, "sending spawn message");
        self.write(&spawned)
    }

    /// Refuse host configurations a selective run cannot honor.
    pub fn check_configuration<H: TestFramework + ?Sized>(
        &self,
        host: &H,
    ) -> Result<(), WorkerError> {
        if host.fail_fast() {
            let message = "fail-fast is not supported when running under ABQ; \
                           ABQ assigns tests across runners, so stopping one runner early \
                           would leave its remaining tests unreported. \
                           Remove the fail-fast option and run again."
                .to_owned();
            tracing::error!("{message}");
            return Err(WorkerError::UnsupportedConfiguration(message));
        }
        Ok(())
    }

    /// Write the manifest of the host's suite. No test bodies run.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn generate_manifest<H: TestFramework + ?Sized>(
        &mut self,
        host: &H,
    ) -> Result<(), WorkerError> {
        self.transition(WorkerState::ManifestGeneration);
        let tree = host.load_tree();
        let manifest = manifest::generate(
            &tree,
            host.seed(),
            &host.global_ordering(),
            modification_times(host, &tree),
        )?;
        tracing::debug!(tests = tree.test_count(), "manifest generated");
        self.write(&ManifestMessage { manifest })?;
        self.transition(WorkerState::Done);
        Ok(())
    }

    /// Read the init message, acknowledge it, and apply its ordering.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn initialize<H: TestFramework + ?Sized>(
        &mut self,
        host: &mut H,
    ) -> Result<Initialized, WorkerError> {
        self.transition(WorkerState::AwaitingInit);
        let init: InitMessage = self.read()?.into_message().ok_or_else(|| {
            WorkerError::ProtocolViolation(
                "connection closed before the init message arrived".to_owned(),
            )
        })?;
        tracing::debug!(?init, "init message");
        self.write(&InitSuccess {})?;

        if init.fast_exit {
            tracing::info!("fast exit: no tests assigned to this runner");
            self.transition(WorkerState::Done);
            return Ok(Initialized::FastExit);
        }

        let changed = match init.init_meta {
            Some(meta) => {
                let ordering: Ordering = meta.ordering.parse()?;
                apply_ordering(host, ordering, meta.seed)
            }
            None => false,
        };
        Ok(Initialized::Ready { changed })
    }

    /// Replace the target with the next directive. A closed stream yields
    /// the end marker.
    pub fn fetch_next(&mut self) -> Result<&TestCase, WorkerError> {
        self.target = match self.read::<TestCaseMessage>()? {
            Incoming::Message(message) => TestCase::from(message),
            Incoming::Closed => TestCase::end_marker(),
        };
        tracing::debug!(directive = %self.target, "fetched directive");
        Ok(&self.target)
    }

    /// Write one test result.
    pub fn report(&mut self, result: TestResult) -> Result<(), WorkerError> {
        tracing::debug!(id = %result.id, status = ?result.status, "reporting result");
        self.write(&TestResultMessage {
            test_result: result,
        })
    }

    /// Run every directive the worker sends, then check the stream ended
    /// where it should.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn run<H: TestFramework + ?Sized>(
        &mut self,
        host: &mut H,
    ) -> Result<RunSummary, WorkerError> {
        self.transition(WorkerState::Running);
        let tree = host.load_tree();
        let strategy = OrderingStrategy::new(host.global_ordering().supported()?, host.seed())
            .with_modification_times(modification_times(host, &tree));

        if let Err(raised) = host.before_suite() {
            report_suite_error(&raised);
            self.transition(WorkerState::Done);
            return Ok(RunSummary {
                all_passed: false,
                tests_reported: 0,
                protocol_violation: None,
            });
        }

        self.fetch_next()?;
        let mut traversal = Traversal::new(self, host, &strategy);
        let walked = traversal.run_roots(&tree);
        let tests_reported = traversal.reported();
        host.after_suite();
        let all_passed = walked?;

        self.transition(WorkerState::Draining);
        let protocol_violation = if self.target.is_end_marker() {
            None
        } else {
            let message = format!(
                "finished running every group, but the worker still expects a result for {}",
                self.target
            );
            tracing::error!(
                directive = %self.target,
                "ABQ protocol violation: the run ended before the end marker"
            );
            Some(message)
        };
        self.transition(WorkerState::Done);

        Ok(RunSummary {
            all_passed,
            tests_reported,
            protocol_violation,
        })
    }
}

fn runner_specification(info: FrameworkInfo) -> NativeRunnerSpecification {
    NativeRunnerSpecification {
        name: RUNNER_NAME.to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        test_framework: info.test_framework,
        test_framework_version: info.test_framework_version,
        language: info.language,
        language_version: info.language_version,
        host: info.host,
    }
}

/// Set the host's ordering and seed to the shared ones, touching each only
/// if it differs. Returns whether anything changed.
fn apply_ordering<H: TestFramework + ?Sized>(host: &mut H, ordering: Ordering, seed: u64) -> bool {
    let mut changed = false;
    if host.seed() != seed {
        tracing::debug!(from = host.seed(), to = seed, "updating seed");
        host.set_seed(seed);
        changed = true;
    }
    if host.global_ordering() != GlobalOrdering::Supported(ordering) {
        tracing::debug!(to = %ordering, "updating global ordering");
        host.set_global_ordering(ordering);
        changed = true;
    }
    changed
}

fn modification_times<H: TestFramework + ?Sized>(
    host: &H,
    tree: &TestTree,
) -> BTreeMap<String, SystemTime> {
    tree.source_files()
        .into_iter()
        .filter_map(|file| Some((file.to_owned(), host.file_modified_at(file)?)))
        .collect()
}

fn report_suite_error(raised: &Raised) {
    tracing::error!(
        class = raised.class_name(),
        message = %raised.message,
        "error in before-suite hook; no tests were run"
    );
}
