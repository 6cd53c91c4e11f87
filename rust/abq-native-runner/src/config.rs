//! Launch configuration, read from the environment once at startup.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use abq_protocol::{ABQ_GENERATE_MANIFEST, ABQ_RUNNER, ABQ_SOCKET};

/// Run natively even when launched by ABQ.
pub const ABQ_DISABLE_NATIVE_RUNNER: &str = "ABQ_DISABLE_NATIVE_RUNNER";

/// Pid of the outermost adapter process. Nested invocations run natively.
pub const ABQ_NATIVE_RUNNER_PID: &str = "ABQ_NATIVE_RUNNER_PID";

/// Milliseconds to wait for the worker socket to accept.
pub const ABQ_CONNECT_TIMEOUT_MS: &str = "ABQ_CONNECT_TIMEOUT_MS";

/// Directory for per-runner debug logs.
pub const ABQ_NATIVE_RUNNER_DEBUG_LOG_DIR: &str = "ABQ_NATIVE_RUNNER_DEBUG_LOG_DIR";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Everything the adapter reads from its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// `host:port` of the worker. `None` outside ABQ.
    pub socket: Option<String>,
    pub generate_manifest: bool,
    pub disabled: bool,
    /// Pid recorded by an enclosing adapter, if any.
    pub guard_pid: Option<u32>,
    pub connect_timeout: Duration,
    pub debug_log_dir: Option<PathBuf>,
    /// Runner index within the worker, for log file names.
    pub runner: Option<String>,
}

/// Whether this process should speak the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Run the host framework unmodified.
    Native,
    /// Connect to the worker at `socket`. `export_guard` is the value to
    /// publish in [`ABQ_NATIVE_RUNNER_PID`] when this process is the first
    /// to claim it.
    Worker {
        socket: String,
        export_guard: Option<String>,
    },
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            socket: None,
            generate_manifest: false,
            disabled: false,
            guard_pid: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            debug_log_dir: None,
            runner: None,
        }
    }
}

impl LaunchConfig {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars_os())
    }

    /// Parse from explicit variables. Unknown names are ignored; values that
    /// are empty or not valid UTF-8 count as absent.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let (key, value) = (key.into(), value.into());
            let (Some(key), Some(value)) = (key.to_str(), value.to_str()) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            match key {
                ABQ_SOCKET => config.socket = Some(value.to_owned()),
                ABQ_GENERATE_MANIFEST => config.generate_manifest = true,
                ABQ_DISABLE_NATIVE_RUNNER => config.disabled = true,
                ABQ_NATIVE_RUNNER_PID => config.guard_pid = value.parse().ok(),
                ABQ_CONNECT_TIMEOUT_MS => {
                    if let Ok(ms) = value.parse() {
                        config.connect_timeout = Duration::from_millis(ms);
                    }
                }
                ABQ_NATIVE_RUNNER_DEBUG_LOG_DIR => config.debug_log_dir = Some(value.into()),
                ABQ_RUNNER => config.runner = Some(value.to_owned()),
                _ => {}
            }
        }
        config
    }

    /// Decide whether process `pid` runs natively or as a worker's runner.
    pub fn activation(&self, pid: u32) -> Activation {
        let Some(socket) = self.socket.clone() else {
            return Activation::Native;
        };
        if self.disabled {
            return Activation::Native;
        }
        match self.guard_pid {
            None => Activation::Worker {
                socket,
                export_guard: Some(pid.to_string()),
            },
            Some(guard) if guard == pid => Activation::Worker {
                socket,
                export_guard: None,
            },
            Some(_) => Activation::Native,
        }
    }

    /// Name of the debug log file for this runner.
    pub fn log_file_name(&self) -> String {
        format!("worker-{}.log", self.runner.as_deref().unwrap_or("unknown"))
    }
}
