//! Tracing subscriber setup.
//!
//! Without a debug log directory, events at `warn` and above go to stderr
//! (override with `RUST_LOG`). With one, every runner appends to its own
//! file and span close events record how long each protocol step took.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use crate::config::LaunchConfig;

const STDERR_DEFAULT_FILTER: &str = "warn";
const FILE_DEFAULT_FILTER: &str = "warn,abq_protocol=debug,abq_native_runner=debug";

/// Where logs ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Stderr,
    File(PathBuf),
}

/// Install the global subscriber. A subscriber installed earlier (by a
/// test harness, say) is left in place.
pub fn init(config: &LaunchConfig) -> io::Result<LogDestination> {
    match &config.debug_log_dir {
        Some(dir) => {
            let (path, file) = open_log_file(dir, &config.log_file_name())?;
            let _ = tracing::subscriber::set_global_default(file_subscriber(file));
            tracing::info!(
                pid = std::process::id(),
                runner = config.runner.as_deref().unwrap_or("unknown"),
                "logger started"
            );
            Ok(LogDestination::File(path))
        }
        None => {
            let _ = tracing::subscriber::set_global_default(stderr_subscriber());
            Ok(LogDestination::Stderr)
        }
    }
}

/// Create `dir` if needed and open `name` inside it for appending.
pub fn open_log_file(dir: &Path, name: &str) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

pub fn file_subscriber(file: File) -> impl Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_env_filter(filter(FILE_DEFAULT_FILTER))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .finish()
}

fn stderr_subscriber() -> impl Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_env_filter(filter(STDERR_DEFAULT_FILTER))
        .with_writer(io::stderr)
        .finish()
}
