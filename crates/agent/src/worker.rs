//! Background jobs that report back over a channel.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

use crate::executor::{ExecOutput, Executor};
use crate::sandbox::SandboxUnit;

/// Thread name of the execution worker.
pub const EXEC_THREAD: &str = "sandbox-exec";

#[derive(Debug, PartialEq)]
pub enum WorkerPoll<T> {
    Pending,
    Ready(T),
    /// The worker died without sending a result
    Lost,
}

/// Receiving end of one background job.
pub struct WorkerHandle<T> {
    name: String,
    rx: Receiver<T>,
}

impl<T> WorkerHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-blocking check for the result.
    pub fn poll(&self) -> WorkerPoll<T> {
        match self.rx.try_recv() {
            Ok(value) => WorkerPoll::Ready(value),
            Err(TryRecvError::Empty) => WorkerPoll::Pending,
            Err(TryRecvError::Disconnected) => WorkerPoll::Lost,
        }
    }

    /// Block until the job finishes. None if the worker died first.
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }
}

/// Run `job` on a named thread. If the thread cannot be started,
/// `on_spawn_error` produces the result instead.
pub fn spawn_worker<T, F, E>(name: &str, job: F, on_spawn_error: E) -> WorkerHandle<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
    E: FnOnce(std::io::Error) -> T,
{
    let (tx, rx) = mpsc::channel();
    let fallback_tx = tx.clone();

    let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
        // Receiver gone means nobody is waiting any more
        let _ = tx.send(job());
    });
    if let Err(e) = spawned {
        log::error!("failed to spawn worker '{}': {}", name, e);
        let _ = fallback_tx.send(on_spawn_error(e));
    }

    WorkerHandle {
        name: name.to_string(),
        rx,
    }
}

/// Execute a unit off the event thread.
pub fn spawn_execution(executor: Arc<dyn Executor>, unit: SandboxUnit) -> WorkerHandle<ExecOutput> {
    log::debug!("dispatching '{}' to the {} backend", unit.entry, executor.name());
    spawn_worker(
        EXEC_THREAD,
        move || executor.execute(&unit),
        |e| ExecOutput::failed_to_start(format!("failed to start execution worker: {}", e)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InProcessExecutor;
    use std::time::Duration;

    #[test]
    fn test_worker_reports_result() {
        let handle = spawn_worker("test-worker", || 6 * 7, |_| 0);
        assert_eq!(handle.name(), "test-worker");
        assert_eq!(handle.wait(), Some(42));
    }

    #[test]
    fn test_poll_until_ready() {
        let handle = spawn_worker(
            "slow",
            || {
                thread::sleep(Duration::from_millis(20));
                "done"
            },
            |_| "failed",
        );
        let mut polls = 0;
        loop {
            match handle.poll() {
                WorkerPoll::Pending => {
                    polls += 1;
                    thread::sleep(Duration::from_millis(5));
                }
                WorkerPoll::Ready(v) => {
                    assert_eq!(v, "done");
                    break;
                }
                WorkerPoll::Lost => panic!("worker lost"),
            }
        }
        assert!(polls > 0);
    }

    #[test]
    fn test_panicking_worker_is_lost() {
        let handle: WorkerHandle<u32> = spawn_worker("panics", || panic!("boom"), |_| 0);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.poll(), WorkerPoll::Lost);
    }

    #[test]
    fn test_spawn_execution_runs_on_named_thread() {
        let unit = SandboxUnit {
            source: "print((string.gsub('a-b', '-', '+')))".to_string(),
            entry: "process_data".to_string(),
        };
        let out = spawn_execution(Arc::new(InProcessExecutor::default()), unit).wait().unwrap();
        assert_eq!(out.stdout, "a+b\n");
    }
}
