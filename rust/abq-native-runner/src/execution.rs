//! What the host framework hands back after running something.

use chrono::{DateTime, Utc};

/// Placeholder for exceptions whose class has no name.
pub const ANONYMOUS_ERROR_CLASS: &str = "(anonymous error class)";

/// Whether a raised exception is an unmet assertion or anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ExpectationNotMet,
    Error,
}

/// An exception raised by a test, a hook, or the framework itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raised {
    pub kind: FailureKind,
    /// `None` for anonymous exception classes.
    pub class_name: Option<String>,
    pub message: String,
    pub backtrace: Vec<String>,
}

impl Raised {
    pub fn expectation_not_met(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::ExpectationNotMet,
            class_name: Some("ExpectationNotMetError".to_owned()),
            message: message.into(),
            backtrace: Vec::new(),
        }
    }

    pub fn error(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Error,
            class_name: Some(class_name.into()),
            message: message.into(),
            backtrace: Vec::new(),
        }
    }

    pub fn with_backtrace(mut self, backtrace: Vec<String>) -> Self {
        self.backtrace = backtrace;
        self
    }

    pub fn class_name(&self) -> &str {
        match self.class_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => ANONYMOUS_ERROR_CLASS,
        }
    }

    /// Human-readable presentation, as a console formatter would print it.
    pub fn fully_formatted(&self, display_name: &str) -> String {
        let mut out = format!("\n  1) {display_name}\n     Failure/Error:\n");
        match self.kind {
            FailureKind::ExpectationNotMet => {}
            FailureKind::Error => out.push_str(&format!("     {}:\n", self.class_name())),
        }
        for line in self.message.lines() {
            out.push_str(&format!("       {line}\n"));
        }
        for frame in &self.backtrace {
            out.push_str(&format!("     # {frame}\n"));
        }
        out
    }
}

/// Why control left a test or group other than by finishing normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// Skip was declared: remaining targeted tests are skipped, not failed.
    Skip { reason: Option<String> },
    /// Something raised past the point where the framework would attribute
    /// it to a single test.
    Raise(Raised),
}

/// Final state of a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(Raised),
    /// `skipped` separates explicit skips from tests marked pending.
    Pending {
        skipped: bool,
        reason: Option<String>,
    },
}

/// One completed test run.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Seconds, as measured by the framework's own timer.
    pub run_time: f64,
    pub captured_output: Option<String>,
    /// Failures of earlier attempts retried in-process, oldest first.
    pub past_attempts: Vec<Raised>,
}

impl Execution {
    pub fn new(outcome: Outcome, started_at: DateTime<Utc>, run_time: f64) -> Self {
        let finished_at = started_at
            + chrono::Duration::nanoseconds(runtime_nanos(run_time).min(i64::MAX as u64) as i64);
        Self {
            outcome,
            started_at,
            finished_at,
            run_time,
            captured_output: None,
            past_attempts: Vec::new(),
        }
    }

    /// A test that never ran because its group was interrupted.
    pub fn interrupted(interrupt: &Interrupt) -> Self {
        let outcome = match interrupt {
            Interrupt::Skip { reason } => Outcome::Pending {
                skipped: true,
                reason: reason.clone(),
            },
            Interrupt::Raise(raised) => Outcome::Failed(raised.clone()),
        };
        Self::new(outcome, Utc::now(), 0.0)
    }

    pub fn with_captured_output(mut self, output: impl Into<String>) -> Self {
        self.captured_output = Some(output.into());
        self
    }

    pub fn with_past_attempts(mut self, past_attempts: Vec<Raised>) -> Self {
        self.past_attempts = past_attempts;
        self
    }

    /// Pending and skipped tests count as successes.
    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, Outcome::Failed(_))
    }
}

/// Seconds as a float to whole nanoseconds, rounded.
pub fn runtime_nanos(run_time: f64) -> u64 {
    if run_time.is_finite() && run_time > 0.0 {
        (run_time * 1_000_000_000.0).round() as u64
    } else {
        0
    }
}
