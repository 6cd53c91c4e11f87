//! Running a host framework under an ABQ worker.

use std::io::{Read, Write};

use crate::codec;
use crate::config::LaunchConfig;
use crate::host::TestFramework;
use crate::session::{Initialized, RunSummary, Session};
use crate::{HARD_FAILURE_EXIT_CODE, WorkerError};

/// How a worker connection ended, short of a hard failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    ManifestGenerated,
    FastExit,
    Completed(RunSummary),
}

impl RunOutcome {
    /// Process exit code, given the host's code for failing runs.
    pub fn exit_code(&self, failure_exit_code: i32) -> i32 {
        match self {
            Self::ManifestGenerated | Self::FastExit => 0,
            Self::Completed(summary) if summary.protocol_violation.is_some() => {
                HARD_FAILURE_EXIT_CODE
            }
            Self::Completed(summary) if summary.all_passed => 0,
            Self::Completed(_) => failure_exit_code,
        }
    }
}

/// Speak the protocol over an already connected `stream`.
///
/// Handshake, configuration check, then either the manifest or the
/// init exchange followed by the run.
pub fn drive<S, H>(stream: S, host: &mut H, generate_manifest: bool) -> Result<RunOutcome, WorkerError>
where
    S: Read + Write,
    H: TestFramework + ?Sized,
{
    let mut session = Session::new(stream);
    session.handshake(host.info())?;
    session.check_configuration(host)?;
    host.disable_status_persistence();

    if generate_manifest {
        session.generate_manifest(host)?;
        return Ok(RunOutcome::ManifestGenerated);
    }

    match session.initialize(host)? {
        Initialized::FastExit => Ok(RunOutcome::FastExit),
        Initialized::Ready { changed } => {
            tracing::debug!(changed, "ordering applied");
            Ok(RunOutcome::Completed(session.run(host)?))
        }
    }
}

/// Connect to the worker at `socket` and run. Returns the exit code.
pub fn run_worker<H>(socket: &str, config: &LaunchConfig, host: &mut H) -> i32
where
    H: TestFramework + ?Sized,
{
    let _span = tracing::info_span!("abq_worker", %socket).entered();
    let result = codec::connect(socket, config.connect_timeout)
        .and_then(|stream| drive(stream, host, config.generate_manifest));
    exit_code(result, host.failure_exit_code())
}

/// Map a run's result to an exit code, reporting anything that went wrong.
pub fn exit_code(result: Result<RunOutcome, WorkerError>, failure_exit_code: i32) -> i32 {
    match result {
        Ok(outcome) => {
            if let RunOutcome::Completed(RunSummary {
                protocol_violation: Some(violation),
                ..
            }) = &outcome
            {
                eprintln!("abq-native-runner: ABQ protocol violation: {violation}");
            }
            let code = outcome.exit_code(failure_exit_code);
            tracing::info!(?outcome, code, "worker finished");
            code
        }
        Err(error) => {
            tracing::error!(%error, "worker failed");
            eprintln!("abq-native-runner: {error}");
            error.exit_code()
        }
    }
}
