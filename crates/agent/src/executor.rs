//! Backends that run a sandbox unit and hand back its stdout and stderr.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use sheetchat_config::settings::{ExecutionBackend, ExecutionSettings};

use crate::runtime::{self, RuntimeLimits, TRACEBACK_MARKER};
use crate::sandbox::SandboxUnit;

/// Name of the hidden CLI subcommand the child-process backend re-invokes.
pub const SANDBOX_EXEC_COMMAND: &str = "sandbox-exec";

/// Extra time a child gets past the VM's own timeout before it is killed.
const KILL_GRACE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Output of a run that never got going.
    pub fn failed_to_start(reason: impl std::fmt::Display) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("{}\n{}\n\t[C]: in ?", reason, TRACEBACK_MARKER),
        }
    }
}

pub trait Executor: Send + Sync {
    /// Run the unit to completion (or timeout) and return everything it wrote.
    fn execute(&self, unit: &SandboxUnit) -> ExecOutput;

    fn name(&self) -> &'static str;
}

/// Fresh sandboxed VM per unit, on the calling thread.
#[derive(Debug, Clone, Default)]
pub struct InProcessExecutor {
    limits: RuntimeLimits,
}

impl InProcessExecutor {
    pub fn new(limits: RuntimeLimits) -> Self {
        Self { limits }
    }
}

impl Executor for InProcessExecutor {
    fn execute(&self, unit: &SandboxUnit) -> ExecOutput {
        let started = Instant::now();
        let out = runtime::run_unit(&unit.source, self.limits);
        log::debug!("in-process execution of '{}' took {:?}", unit.entry, started.elapsed());
        out
    }

    fn name(&self) -> &'static str {
        "in_process"
    }
}

/// Runs the unit in a separate process that reads the source on stdin.
///
/// The child enforces the same VM limits; the parent additionally kills it
/// once the timeout (plus a short grace period) has passed.
#[derive(Debug, Clone)]
pub struct ChildProcessExecutor {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ChildProcessExecutor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Re-invoke `program` (normally the running binary) with the hidden
    /// sandbox subcommand and the given limits.
    pub fn sandbox_exec(program: impl Into<PathBuf>, limits: RuntimeLimits) -> Self {
        let args = vec![
            SANDBOX_EXEC_COMMAND.to_string(),
            "--timeout-ms".to_string(),
            limits.timeout.as_millis().to_string(),
            "--instruction-limit".to_string(),
            limits.instruction_limit.to_string(),
        ];
        Self::new(program, args, limits.timeout)
    }
}

impl Executor for ChildProcessExecutor {
    fn execute(&self, unit: &SandboxUnit) -> ExecOutput {
        let started = Instant::now();
        let mut child = match Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ExecOutput::failed_to_start(format!(
                    "failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            }
        };

        // Readers first so a chatty child can't block on a full pipe.
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        if let Some(mut stdin) = child.stdin.take() {
            let source = unit.source.clone();
            // A child that exits early closes the pipe; that error is not ours.
            let _ = thread::Builder::new()
                .name("sandbox-stdin".to_string())
                .spawn(move || {
                    let _ = stdin.write_all(source.as_bytes());
                });
        }

        let deadline = self.timeout + KILL_GRACE;
        let mut killed = false;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if started.elapsed() > deadline => {
                    log::warn!("child sandbox exceeded {:?}, killing", self.timeout);
                    let _ = child.kill();
                    let _ = child.wait();
                    killed = true;
                    break;
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return ExecOutput::failed_to_start(format!("failed to wait for child: {}", e));
                }
            }
        }

        let stdout = stdout_reader.map(join_reader).unwrap_or_default();
        let mut stderr = stderr_reader.map(join_reader).unwrap_or_default();
        if killed {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "execution timeout ({}s limit), process killed\n{}\n\t[C]: in ?",
                self.timeout.as_secs_f64(),
                TRACEBACK_MARKER
            ));
        }

        log::debug!(
            "child-process execution of '{}' took {:?}",
            unit.entry,
            started.elapsed()
        );
        ExecOutput { stdout, stderr }
    }

    fn name(&self) -> &'static str {
        "child_process"
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// The executor selected by settings. `current_exe` is the binary the
/// child-process backend re-invokes; without it the in-process VM is used.
pub fn from_settings(settings: &ExecutionSettings, current_exe: Option<PathBuf>) -> Box<dyn Executor> {
    let limits = RuntimeLimits {
        instruction_limit: settings.instruction_limit,
        timeout: settings.timeout(),
        ..RuntimeLimits::default()
    };
    match (settings.backend, current_exe) {
        (ExecutionBackend::ChildProcess, Some(exe)) => Box::new(ChildProcessExecutor::sandbox_exec(exe, limits)),
        (ExecutionBackend::ChildProcess, None) => {
            log::warn!("child-process backend requested but the executable path is unknown; running in-process");
            Box::new(InProcessExecutor::new(limits))
        }
        (ExecutionBackend::InProcess, _) => Box::new(InProcessExecutor::new(limits)),
    }
}
