//! Process-wide concurrency gates.
//!
//! [`ConcurrencyGate`] bounds how many filesystem operations and how many
//! subprocesses run at once. Operations queue on the gate rather than fail.
//! When the OS runs out of file descriptors (`EMFILE`/`ENFILE`) the wrapped
//! operation is retried after a random 200-600 ms pause, indefinitely; every
//! other error is returned unchanged.

use std::io;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::warn;

/// Default number of concurrent filesystem operations.
pub const DEFAULT_FS_LIMIT: usize = 50;
/// Default number of concurrent subprocesses.
pub const DEFAULT_PROCESS_LIMIT: usize = 100;

/// Two independent counting gates: one for filesystem work, one for
/// external processes.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    fs: Arc<Semaphore>,
    process: Arc<Semaphore>,
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_FS_LIMIT, DEFAULT_PROCESS_LIMIT)
    }
}

impl ConcurrencyGate {
    /// Limits below 1 are raised to 1.
    pub fn new(fs_limit: usize, process_limit: usize) -> Self {
        Self {
            fs: Arc::new(Semaphore::new(fs_limit.max(1))),
            process: Arc::new(Semaphore::new(process_limit.max(1))),
        }
    }

    /// Free filesystem permits right now.
    pub fn fs_available(&self) -> usize {
        self.fs.available_permits()
    }

    /// Free process permits right now.
    pub fn process_available(&self) -> usize {
        self.process.available_permits()
    }

    /// Run blocking filesystem work on the blocking pool while holding a
    /// filesystem permit.
    pub async fn run_fs<T, F>(&self, op: F) -> io::Result<T>
    where
        F: Fn() -> io::Result<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        loop {
            let permit = self
                .fs
                .acquire()
                .await
                .map_err(|_| io::Error::other("filesystem gate closed"))?;
            let task = Arc::clone(&op);
            let result = tokio::task::spawn_blocking(move || task())
                .await
                .map_err(io::Error::other)?;
            drop(permit);

            match result {
                Err(err) if is_descriptor_exhaustion(&err) => {
                    warn!(error = %err, "file descriptors exhausted, retrying filesystem operation");
                    tokio::time::sleep(backoff_delay()).await;
                }
                other => return other,
            }
        }
    }

    /// Spawn `command` and wait for its output while holding a process permit.
    pub async fn run_process(&self, command: &mut Command) -> io::Result<Output> {
        loop {
            let permit = self
                .process
                .acquire()
                .await
                .map_err(|_| io::Error::other("process gate closed"))?;
            let result = command.output().await;
            drop(permit);

            match result {
                Err(err) if is_descriptor_exhaustion(&err) => {
                    warn!(error = %err, "file descriptors exhausted, retrying subprocess");
                    tokio::time::sleep(backoff_delay()).await;
                }
                other => return other,
            }
        }
    }
}

/// True for "too many open files" in this process or system-wide.
pub fn is_descriptor_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

fn backoff_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(200..=600))
}
