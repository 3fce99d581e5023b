//! Child process execution with bounded waits and process-tree cleanup.
//!
//! # Structure
//!
//! - `args` - Splitting a pre-assembled argument string into argv (Unix)
//! - `runner` - [`SystemCommandRunner`], the real [`CommandRunner`]
//! - `tree` - [`ProcessTree`], forced termination of a child and its descendants

mod args;
mod runner;
mod tree;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub use args::split_arguments;
pub use runner::SystemCommandRunner;
pub use tree::ProcessTree;

/// Append-only, ordered collection of stdout lines shared with a running child.
///
/// Clones share the same underlying buffer, so the caller keeps one handle and
/// passes another in [`RunOptions`].
#[derive(Debug, Clone, Default)]
pub struct OutputSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: String) {
        // A poisoned lock only means a previous writer panicked mid-push; the
        // Vec itself is still valid.
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.push(line);
    }

    /// Snapshot of the lines collected so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a command should be run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Working directory, defaults to the current directory of this process.
    pub working_directory: Option<PathBuf>,
    /// Variables added on top of the inherited environment.
    pub environment: Option<BTreeMap<String, String>>,
    /// When set, stdout is captured line by line into this sink instead of
    /// being inherited.
    pub output_sink: Option<OutputSink>,
    /// Maximum wait in milliseconds. `0` waits indefinitely; negative values
    /// are rejected.
    pub timeout_ms: i64,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn capture(mut self, sink: OutputSink) -> Self {
        self.output_sink = Some(sink);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Check the options against the inherited environment.
    ///
    /// `is_inherited` answers whether a variable is already set for this
    /// process.
    pub fn validate<F>(&self, is_inherited: F) -> Result<(), RunError>
    where
        F: Fn(&str) -> bool,
    {
        if self.timeout_ms < 0 {
            return Err(RunError::NegativeTimeout(self.timeout_ms));
        }
        if let Some(env) = &self.environment {
            if let Some(key) = env.keys().find(|k| is_inherited(k)) {
                return Err(RunError::EnvironmentCollision(key.clone()));
            }
        }
        Ok(())
    }
}

/// Outcome of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code of the child. Always `0` when `timed_out` is set.
    pub exit_code: i32,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn exited(exit_code: i32) -> Self {
        Self {
            exit_code,
            timed_out: false,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            exit_code: 0,
            timed_out: true,
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Errors raised before or while starting a child.
#[derive(Debug)]
pub enum RunError {
    /// The process could not be started at all.
    Launch {
        command: String,
        source: std::io::Error,
    },
    /// `timeout_ms` was below zero.
    NegativeTimeout(i64),
    /// An environment override would replace an inherited variable.
    EnvironmentCollision(String),
}

impl RunError {
    /// Whether this is a configuration problem detected before spawning.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RunError::NegativeTimeout(_) | RunError::EnvironmentCollision(_)
        )
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Launch { command, source } => {
                write!(f, "Failed to start '{}': {}", command, source)
            }
            RunError::NegativeTimeout(ms) => {
                write!(f, "Invalid run options: timeout must not be negative (got {}ms)", ms)
            }
            RunError::EnvironmentCollision(key) => {
                write!(
                    f,
                    "Invalid run options: environment variable '{}' is already set and would be overwritten",
                    key
                )
            }
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Launch { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Runs external commands.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` with the pre-assembled `arguments` string.
    ///
    /// Returns `Err` (wrapping [`RunError`]) only when the options are invalid
    /// or the process could not be started. A timeout is reported through
    /// [`ExecutionResult::timed_out`].
    async fn run(
        &self,
        command: &str,
        arguments: &str,
        options: &RunOptions,
    ) -> Result<ExecutionResult>;
}
