//! Runs a scripted suite, natively or under an ABQ worker.
//!
//! # Usage
//!
//! ```bash
//! abq-scripted-suite --suite suites/calculator.json
//! ABQ_SOCKET=127.0.0.1:4000 abq-scripted-suite --suite suites/calculator.json --seed 42
//! ```
//!
//! # Exit Codes
//!
//! - 0: every test passed (or manifest written, or nothing assigned)
//! - the suite's failure exit code (default 1): some test failed
//! - 2: the suite could not be loaded, or the ABQ run failed outside of tests

use std::path::PathBuf;
use std::process::ExitCode;

use abq_native_runner::config::ABQ_NATIVE_RUNNER_PID;
use abq_native_runner::{
    Activation, HARD_FAILURE_EXIT_CODE, LaunchConfig, TestFramework, logging, run_worker,
};
use abq_scripted_suite::ScriptedSuite;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "abq-scripted-suite", version)]
#[command(about = "Run a JSON-described test suite, natively or as an ABQ native runner")]
struct Args {
    /// Suite description (JSON)
    #[arg(long)]
    suite: PathBuf,

    /// Seed for random ordering
    #[arg(long)]
    seed: Option<u64>,

    /// Global ordering (defined, random, recently_modified; anything else is custom)
    #[arg(long)]
    order: Option<String>,

    /// Stop at the first failure (refused under ABQ)
    #[arg(long)]
    fail_fast: bool,

    /// Exit code when a test fails
    #[arg(long)]
    failure_exit_code: Option<i32>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = LaunchConfig::from_env();
    let activation = config.activation(std::process::id());

    if let Activation::Worker {
        export_guard: Some(pid),
        ..
    } = &activation
    {
        // SAFETY: still single-threaded; nothing else reads or writes the
        // environment yet.
        unsafe { std::env::set_var(ABQ_NATIVE_RUNNER_PID, pid) };
    }

    if let Err(e) = logging::init(&config) {
        eprintln!("abq-scripted-suite: could not open debug log: {e}");
    }

    let mut suite = match ScriptedSuite::from_path(&args.suite) {
        Ok(suite) => suite,
        Err(e) => {
            eprintln!("abq-scripted-suite: {}: {e}", args.suite.display());
            return exit_code(HARD_FAILURE_EXIT_CODE);
        }
    };
    if let Some(seed) = args.seed {
        suite.set_seed(seed);
    }
    if let Some(order) = &args.order {
        suite.set_order(order);
    }
    if args.fail_fast {
        suite.set_fail_fast(true);
    }
    if let Some(code) = args.failure_exit_code {
        suite.set_failure_exit_code(code);
    }

    let code = match activation {
        Activation::Native => suite.run_natively(),
        Activation::Worker { socket, .. } => run_worker(&socket, &config, &mut suite),
    };
    exit_code(code)
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
