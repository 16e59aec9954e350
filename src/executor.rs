//! Shell command execution with captured output and an optional timeout.
//!
//! Every command the harness runs (build, hooks, the program under test) goes
//! through [`execute`]. A non-zero exit or a signal is an ordinary
//! [`ExecutionResult`]; only a failure to spawn the shell is an error.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How long to keep draining pipes after a timed-out child has been killed.
/// Grandchildren that inherited the pipes can keep them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A command to run through the host shell.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub command: String,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    /// Working directory (defaults to the harness's own).
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdin: None,
            timeout: None,
            cwd: None,
        }
    }

    pub fn with_stdin(mut self, stdin: Option<Vec<u8>>) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Outcome of one command invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code if the process exited normally.
    pub exit_status: Option<i32>,
    /// Signal number if the process was terminated by a signal (Unix only).
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ExecutionResult {
    /// Exited on its own with status 0.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.signal.is_none() && self.exit_status == Some(0)
    }

    /// Killed by the timeout or by any signal.
    pub fn was_killed(&self) -> bool {
        self.timed_out || self.signal.is_some()
    }

    /// stdout followed by stderr, lossily decoded.
    pub fn combined_output(&self) -> String {
        let mut out = String::from_utf8_lossy(&self.stdout).into_owned();
        out.push_str(&String::from_utf8_lossy(&self.stderr));
        out
    }

    /// Human-readable description of how the process ended.
    pub fn describe_status(&self) -> String {
        if self.timed_out {
            return format!("timed out after {:.2?}", self.duration);
        }
        match (self.exit_status, self.signal) {
            (_, Some(sig)) => format!("killed by {}", signal_name(sig)),
            (Some(code), None) => format!("exited with status {code}"),
            (None, None) => "ended with an unknown status".to_string(),
        }
    }
}

/// Render a signal number with its conventional name where one is known.
pub fn signal_name(signal: i32) -> String {
    let name = match signal {
        1 => "SIGHUP",
        2 => "SIGINT",
        3 => "SIGQUIT",
        4 => "SIGILL",
        6 => "SIGABRT",
        8 => "SIGFPE",
        9 => "SIGKILL",
        11 => "SIGSEGV",
        13 => "SIGPIPE",
        14 => "SIGALRM",
        15 => "SIGTERM",
        _ => return format!("signal {signal}"),
    };
    name.to_string()
}

/// Run `spec` to completion (or until its timeout expires).
///
/// The timeout covers both the shell and its output: a background process that
/// keeps stdout or stderr open past the deadline times the command out too.
/// Returns `Err` only if the shell itself could not be spawned or waited on.
pub fn execute(spec: &CommandSpec) -> io::Result<ExecutionResult> {
    let mut cmd = shell_command(&spec.command);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    if spec.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    debug!(command = %spec.command, timeout = ?spec.timeout, "spawning");
    let start = Instant::now();
    let deadline = spec.timeout.map(|limit| start + limit);
    let mut child = cmd.spawn()?;

    // Fed from a detached thread so a child that never reads its input cannot
    // block output capture.
    if let (Some(mut pipe), Some(bytes)) = (child.stdin.take(), spec.stdin.clone()) {
        thread::spawn(move || {
            if let Err(e) = pipe.write_all(&bytes)
                && e.kind() != io::ErrorKind::BrokenPipe
            {
                warn!(error = %e, "failed to write stdin");
            }
        });
    }

    let stdout = StreamCapture::spawn(child.stdout.take());
    let stderr = StreamCapture::spawn(child.stderr.take());

    let waited = match spec.timeout {
        Some(limit) => child.wait_timeout(limit)?,
        None => Some(child.wait()?),
    };

    let (status, mut timed_out) = match waited {
        Some(status) => (status, false),
        None => {
            warn!(command = %spec.command, "timed out, killing");
            kill_process_group(&mut child);
            (child.wait()?, true)
        }
    };

    if !timed_out
        && let Some(deadline) = deadline
        && !drain_until(&[&stdout, &stderr], deadline)
    {
        warn!(command = %spec.command, "output still open at the deadline, killing");
        kill_process_group(&mut child);
        timed_out = true;
    }

    let (stdout, stderr) = if timed_out {
        (stdout.finish_within(DRAIN_GRACE), stderr.finish_within(DRAIN_GRACE))
    } else {
        (stdout.finish(), stderr.finish())
    };

    let result = ExecutionResult {
        stdout,
        stderr,
        exit_status: status.code(),
        signal: exit_signal(&status),
        timed_out,
        duration: start.elapsed(),
    };
    debug!(
        command = %spec.command,
        status = %result.describe_status(),
        stdout_bytes = result.stdout.len(),
        stderr_bytes = result.stderr.len(),
        "finished"
    );
    Ok(result)
}

/// Poll until every capture has reached EOF or `deadline` passes.
/// Returns whether all of them reached EOF.
fn drain_until(captures: &[&StreamCapture], deadline: Instant) -> bool {
    loop {
        if captures.iter().all(|c| c.is_drained()) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    use std::os::unix::process::CommandExt;

    let mut c = Command::new("sh");
    c.arg("-c").arg(command);
    // The shell leads a new process group so its background children can be
    // killed with it.
    c.process_group(0);
    c
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut c = Command::new("cmd");
    c.arg("/C").arg(command);
    c
}

/// Kill the shell and everything left in its process group.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // SAFETY: kill(2) only delivers a signal; a negative pid targets the group.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        // Nothing left in the group; the shell may already have been reaped.
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Drains one child pipe on a background thread into a shared buffer.
struct StreamCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamCapture {
    fn spawn<R: Read + Send + 'static>(source: Option<R>) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let handle = source.map(|mut reader| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match reader.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => buffer
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .extend_from_slice(&chunk[..n]),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
            })
        });
        Self { buffer, handle }
    }

    /// Wait for EOF and return everything read.
    fn finish(mut self) -> Vec<u8> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.snapshot()
    }

    fn is_drained(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait up to `grace` for EOF, then return whatever has been read so far.
    fn finish_within(mut self, grace: Duration) -> Vec<u8> {
        let deadline = Instant::now() + grace;
        while !self.is_drained() && Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
        }
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("pipe still held open by a process outside the group, detaching reader");
            }
        }
        self.snapshot()
    }

    fn snapshot(&self) -> Vec<u8> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
