//! Scripted command runner for tests.
//!
//! ```ignore
//! let runner = FakeRunner::new(|cmd, _| match cmd.program.as_str() {
//!     "dpkg-query" => FakeRunner::exit(1, "no packages found matching zsh"),
//!     _ => FakeRunner::ok(""),
//! });
//! ```

use crate::error::Result;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, RunOptions};
use converge::CancelToken;
use std::sync::Mutex;

type Responder = dyn Fn(&CommandSpec, &RunOptions) -> Result<CommandOutput> + Send + Sync;

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: CommandSpec,
    pub elevated: bool,
    pub idempotent: bool,
}

/// Runner that answers from a closure and records every call.
pub struct FakeRunner {
    responder: Box<Responder>,
    calls: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&CommandSpec, &RunOptions) -> Result<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A runner where every command succeeds with no output
    pub fn succeeding() -> Self {
        Self::new(|_, _| Self::ok(""))
    }

    /// Successful output
    pub fn ok(stdout: &str) -> Result<CommandOutput> {
        Ok(CommandOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            ..Default::default()
        })
    }

    /// Non-zero exit with the given stderr
    pub fn exit(code: i32, stderr: &str) -> Result<CommandOutput> {
        Ok(CommandOutput {
            exit_code: code,
            stderr: stderr.to_string(),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Recorded command lines, in call order
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.command.display()).collect()
    }

    /// Whether any recorded command line starts with `prefix`
    pub fn ran(&self, prefix: &str) -> bool {
        self.command_lines().iter().any(|line| line.starts_with(prefix))
    }
}

impl CommandRunner for FakeRunner {
    fn execute(
        &self,
        command: &CommandSpec,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> Result<CommandOutput> {
        if cancel.is_cancelled() {
            return Err(crate::error::Error::Cancelled {
                command: command.display(),
            });
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Invocation {
                command: command.clone(),
                elevated: options.elevate,
                idempotent: options.idempotent,
            });
        }
        (self.responder)(command, options)
    }
}
