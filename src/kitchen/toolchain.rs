// src/kitchen/toolchain.rs

//! Toolchain invocation
//!
//! Every build step is one external process described by an [`Invocation`].
//! The [`ToolchainInvoker`] trait is the seam between the orchestrator and
//! the operating system; tests substitute a scripted invoker.
//!
//! [`ProcessInvoker`] starts each step in its own process group so that a
//! timeout or cancellation can terminate the whole tree (`make` and every
//! compiler it spawned), not just the direct child.

use super::env::EnvOverlay;
use std::io::{self, Read};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How often a running step checks for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for output pipes once the process group is gone
///
/// Only a process that left the group (`setsid`) can hold them longer.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Shared cancellation flag
///
/// Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One toolchain step
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Phase label used for logging
    pub phase: String,
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub env: EnvOverlay,
    pub timeout: Duration,
}

impl Invocation {
    /// Command line for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit status and captured output of a step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    /// Exit code, or 128 + signal number if the process was killed
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// How a step ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The process exited on its own
    Exited(StepOutput),
    /// The step exceeded its timeout and its process group was killed
    TimedOut { output: StepOutput },
    /// Cancellation was requested and the process group was killed
    Cancelled,
}

/// Runs toolchain steps
pub trait ToolchainInvoker: Send + Sync {
    /// Run one step to completion, timeout, or cancellation
    ///
    /// An `Err` means the process could not be started at all.
    fn invoke(&self, invocation: &Invocation, cancel: &CancelToken) -> io::Result<StepOutcome>;
}

/// Invoker that spawns real processes
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    poll_interval: Duration,
}

impl Default for ProcessInvoker {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl ToolchainInvoker for ProcessInvoker {
    fn invoke(&self, invocation: &Invocation, cancel: &CancelToken) -> io::Result<StepOutcome> {
        debug!("[{}] {}", invocation.phase, invocation.display());

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.workdir)
            .envs(invocation.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        // A timeout too large to represent is no deadline at all
        let deadline = Instant::now().checked_add(invocation.timeout);

        loop {
            if cancel.is_cancelled() {
                kill_group(&mut child);
                let _ = collect(stdout, stderr, None);
                return Ok(StepOutcome::Cancelled);
            }

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                warn!(
                    "[{}] timed out after {}s, killing process group",
                    invocation.phase,
                    invocation.timeout.as_secs()
                );
                let status = kill_group(&mut child);
                return Ok(StepOutcome::TimedOut {
                    output: collect(stdout, stderr, status),
                });
            }

            let slice = match deadline {
                Some(d) => self.poll_interval.min(d - now),
                None => self.poll_interval,
            };
            if let Some(status) = child.wait_timeout(slice)? {
                // Background children of the step must not outlive it
                reap_group(&child);
                return Ok(StepOutcome::Exited(collect(
                    stdout,
                    stderr,
                    Some(exit_code(status)),
                )));
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
        rx
    })
}

fn collect(
    stdout: Option<Receiver<Vec<u8>>>,
    stderr: Option<Receiver<Vec<u8>>>,
    status: Option<i32>,
) -> StepOutput {
    let until = Instant::now() + DRAIN_GRACE;
    let read = |rx: Option<Receiver<Vec<u8>>>| {
        rx.and_then(|rx| {
            rx.recv_timeout(until.saturating_duration_since(Instant::now()))
                .ok()
        })
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
    };
    StepOutput {
        status: status.unwrap_or(-1),
        stdout: read(stdout),
        stderr: read(stderr),
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Kill the child's process group and reap the child
fn kill_group(child: &mut Child) -> Option<i32> {
    let pgid = nix::unistd::Pid::from_raw(child.id() as i32);
    if let Err(e) = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pgid, e);
        let _ = child.kill();
    }
    child.wait().ok().map(exit_code)
}

/// Kill whatever is left in an exited child's process group
fn reap_group(child: &Child) {
    let pgid = nix::unistd::Pid::from_raw(child.id() as i32);
    match nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL) {
        Ok(()) => debug!("Killed leftover processes in group {}", pgid),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => debug!("killpg({}) failed: {}", pgid, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> Invocation {
        Invocation {
            phase: "build".into(),
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            workdir: std::env::temp_dir(),
            env: EnvOverlay::new().with("GREETING", "hello"),
            timeout,
        }
    }

    #[test]
    fn test_captures_output_and_status() {
        let outcome = ProcessInvoker::new()
            .invoke(
                &sh("echo $GREETING; echo oops >&2; exit 3", Duration::from_secs(10)),
                &CancelToken::new(),
            )
            .unwrap();
        match outcome {
            StepOutcome::Exited(out) => {
                assert_eq!(out.status, 3);
                assert_eq!(out.stdout.trim(), "hello");
                assert_eq!(out.stderr.trim(), "oops");
                assert!(!out.success());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_process_tree() {
        let started = Instant::now();
        let outcome = ProcessInvoker::new()
            .invoke(
                &sh("sleep 30 & sleep 30; wait", Duration::from_millis(300)),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(matches!(outcome, StepOutcome::TimedOut { .. }));
        // The backgrounded sleep holds the pipes open unless the whole group dies
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_background_child_does_not_outlive_step() {
        let started = Instant::now();
        let outcome = ProcessInvoker::new()
            .invoke(
                &sh("sleep 30 & echo started; exit 0", Duration::from_secs(1)),
                &CancelToken::new(),
            )
            .unwrap();
        match outcome {
            StepOutcome::Exited(out) => {
                assert!(out.success());
                assert_eq!(out.stdout.trim(), "started");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_unrepresentable_timeout_means_no_deadline() {
        let outcome = ProcessInvoker::new()
            .invoke(
                &sh("echo done", Duration::from_secs(u64::MAX)),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Exited(ref out) if out.stdout.trim() == "done"));
    }

    #[test]
    fn test_cancellation() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let outcome = ProcessInvoker::new()
            .with_poll_interval(Duration::from_millis(20))
            .invoke(&sh("sleep 30", Duration::from_secs(60)), &cancel)
            .unwrap();
        assert_eq!(outcome, StepOutcome::Cancelled);
    }

    #[test]
    fn test_missing_program() {
        let mut invocation = sh("", Duration::from_secs(1));
        invocation.program = "/nonexistent/formulary-tool".into();
        assert!(ProcessInvoker::new()
            .invoke(&invocation, &CancelToken::new())
            .is_err());
    }
}
