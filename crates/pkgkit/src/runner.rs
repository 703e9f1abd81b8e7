//! Uniform execution of external commands.
//!
//! Every package manager and provider goes through a [`CommandRunner`], so
//! timeouts, cancellation, elevation and output capture behave the same for
//! all of them. Tests substitute a scripted runner.

use crate::error::{Error, Result};
use crate::retry::{LogCallback, RetryPolicy, with_retry};
use converge::CancelToken;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Default per-invocation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default cap on captured bytes per stream
pub const DEFAULT_OUTPUT_CAP: usize = 64 * 1024;

/// How often a running child is checked for exit, timeout and cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for pipes to close after the process group was killed
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Program plus argument vector. Never interpreted by a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The command line as a single string, for logs and errors
    pub fn display(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Execution options for one invocation
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    /// Run with administrator rights (`sudo -n`) unless already root
    pub elevate: bool,
    /// Safe to re-run; transient failures are retried per `retry`
    pub idempotent: bool,
    pub retry: RetryPolicy,
    /// Bytes kept per stream; older output is dropped
    pub output_cap: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            env: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            elevate: false,
            idempotent: false,
            retry: RetryPolicy::default(),
            output_cap: DEFAULT_OUTPUT_CAP,
        }
    }
}

impl RunOptions {
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevate = true;
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 when terminated by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Either stream exceeded the output cap
    pub truncated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external commands.
pub trait CommandRunner: Send + Sync {
    /// Run once and capture the output, whatever the exit code.
    ///
    /// Errors only when the process could not be started, timed out, or was
    /// cancelled.
    fn execute(
        &self,
        command: &CommandSpec,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> Result<CommandOutput>;

    /// Run and require a zero exit code, retrying idempotent commands.
    fn run(
        &self,
        command: &CommandSpec,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> Result<CommandOutput> {
        let attempt = || {
            let output = self.execute(command, options, cancel)?;
            if output.success() {
                Ok(output)
            } else {
                Err(Error::Failed {
                    command: command.display(),
                    exit_code: output.exit_code,
                    stderr: output.stderr,
                })
            }
        };

        if options.idempotent {
            with_retry(&options.retry, Some(&LogCallback), cancel, attempt)
        } else {
            attempt()
        }
    }
}

/// Runner backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    /// Final program and arguments, with elevation applied.
    ///
    /// `sudo` resets the environment, so extra variables are passed through
    /// `env` when elevating.
    fn effective_command(command: &CommandSpec, options: &RunOptions) -> CommandSpec {
        if !options.elevate || is_root() {
            return command.clone();
        }
        let mut elevated = CommandSpec::new("sudo").arg("-n");
        if !options.env.is_empty() {
            elevated = elevated
                .arg("env")
                .args(options.env.iter().map(|(k, v)| format!("{k}={v}")));
        }
        elevated
            .arg(command.program.clone())
            .args(command.args.iter().cloned())
    }
}

impl CommandRunner for SystemRunner {
    fn execute(
        &self,
        command: &CommandSpec,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> Result<CommandOutput> {
        let display = command.display();
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { command: display });
        }

        let effective = Self::effective_command(command, options);
        log::debug!("exec: {}", effective);

        let mut cmd = Command::new(&effective.program);
        cmd.args(&effective.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &options.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        // Own process group, so a kill reaches everything the command started
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::CommandNotFound {
                    command: effective.program.clone(),
                }
            } else {
                Error::Io(e)
            }
        })?;

        let pid = child.id();
        let stdout = child.stdout.take().map(|s| capture(s, options.output_cap));
        let stderr = child.stderr.take().map(|s| capture(s, options.output_cap));

        let deadline = Instant::now() + options.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if cancel.is_cancelled() || Instant::now() >= deadline {
                terminate(&mut child);
                discard(stdout);
                discard(stderr);
                return Err(interrupted(display, options.timeout, cancel));
            }
            thread::sleep(POLL_INTERVAL);
        };

        // Background processes left in the group may still hold the pipes;
        // the deadline covers them too
        let drained = collect(stdout, deadline, cancel)
            .and_then(|out| collect(stderr, deadline, cancel).map(|err| (out, err)));
        let ((stdout, out_truncated), (stderr, err_truncated)) = match drained {
            Some(outputs) => outputs,
            None => {
                kill_group(pid);
                return Err(interrupted(display, options.timeout, cancel));
            }
        };
        let exit_code = status.code().unwrap_or(-1);
        log::trace!("exit {} from {}", exit_code, display);

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
            truncated: out_truncated || err_truncated,
        })
    }
}

/// Whether the current process already has administrator rights
pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Cancellation wins over the deadline when both apply.
fn interrupted(command: String, after: Duration, cancel: &CancelToken) -> Error {
    if cancel.is_cancelled() {
        Error::Cancelled { command }
    } else {
        Error::Timeout { command, after }
    }
}

/// SIGKILL every process in the group the runner created for `pid`.
fn kill_group(pid: u32) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(pid) {
            // SAFETY: signalling a process group we created; failure is harmless
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kill the child and its process group, then reap it.
fn terminate(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

/// Keeps the last `cap` bytes written to it.
#[derive(Debug)]
pub(crate) struct TailBuffer {
    cap: usize,
    buf: Vec<u8>,
    truncated: bool,
}

impl TailBuffer {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            cap,
            buf: Vec::new(),
            truncated: false,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.cap {
            let excess = self.buf.len() - self.cap;
            self.buf.drain(..excess);
            self.truncated = true;
        }
    }

    pub(crate) fn finish(self) -> (String, bool) {
        (String::from_utf8_lossy(&self.buf).into_owned(), self.truncated)
    }
}

/// Result of a pipe reader, delivered once the pipe reaches end of file
struct Capture(mpsc::Receiver<(String, bool)>);

/// Drain a pipe on its own thread so a chatty child never blocks on a full pipe.
fn capture<R: Read + Send + 'static>(mut pipe: R, cap: usize) -> Capture {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut tail = TailBuffer::new(cap);
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => tail.push(&chunk[..n]),
            }
        }
        let _ = tx.send(tail.finish());
    });
    Capture(rx)
}

/// Wait for a reader until the deadline or cancellation; `None` if either hits first.
fn collect(
    capture: Option<Capture>,
    deadline: Instant,
    cancel: &CancelToken,
) -> Option<(String, bool)> {
    let Some(Capture(rx)) = capture else {
        return Some(Default::default());
    };
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(output) => return Some(output),
            Err(RecvTimeoutError::Disconnected) => return Some(Default::default()),
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() || Instant::now() >= deadline {
                    return None;
                }
            }
        }
    }
}

/// Give a reader a moment to finish after a kill, without blocking on
/// processes that escaped the group.
fn discard(capture: Option<Capture>) {
    if let Some(Capture(rx)) = capture {
        let _ = rx.recv_timeout(KILL_GRACE);
    }
}
