//! Subprocess supervision.
//!
//! One [`Supervisor::run`] call spawns the job command in its workspace and
//! settles exactly once: on exit, on timeout, or on a kill request through
//! the job's [`ProcessSlot`]. Output from stdout and stderr is appended to a
//! single console buffer and pushed to a [`ConsoleSink`] at most once per
//! flush interval while the process runs, plus once after it ends.

use crate::sandbox::CommandLine;
use async_trait::async_trait;
use camino::Utf8Path;
use spindle_remote::RemoteError;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// How long to keep reading buffered output after the process exits.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to launch {command}: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Process exited with code {code}")]
    Exited { code: i32 },
    #[error("Process terminated by signal")]
    Signaled,
    #[error("Timeout")]
    Timeout,
    #[error("Process was killed")]
    Killed,
    #[error("Failed to wait for process: {0}")]
    Wait(std::io::Error),
    #[error("Unexpected: Child process already running")]
    AlreadyRunning,
}

/// Receives the accumulated console output.
#[async_trait]
pub trait ConsoleSink: Send + Sync {
    async fn publish(&self, output: &str) -> Result<(), RemoteError>;
}

/// Decides when a running job's console output is pushed again.
#[derive(Debug, Clone)]
pub struct FlushThrottle {
    interval: Duration,
    last: Instant,
}

impl FlushThrottle {
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last: start,
        }
    }

    /// True (and restarts the interval) when at least `interval` has
    /// passed since the last flush.
    pub fn should_flush(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

/// Kill handle for a job's subprocess; at most one can be live.
#[derive(Debug, Clone, Default)]
pub struct ProcessSlot {
    kill: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ProcessSlot {
    fn lock(&self) -> MutexGuard<'_, Option<oneshot::Sender<()>>> {
        self.kill.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the slot for a new process.
    pub fn install(&self) -> Result<oneshot::Receiver<()>, ExecError> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(ExecError::AlreadyRunning);
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(tx);
        Ok(rx)
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn is_live(&self) -> bool {
        self.lock().is_some()
    }

    /// Ask the live process to die. Returns false if there is none.
    pub fn kill(&self) -> bool {
        match self.lock().take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// Result of one supervised run.
#[derive(Debug)]
pub struct Supervised {
    /// Everything the process wrote to stdout and stderr
    pub console: String,
    pub result: Result<(), ExecError>,
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    timeout: Duration,
    flush_interval: Duration,
}

impl Supervisor {
    pub fn new(timeout: Duration, flush_interval: Duration) -> Self {
        Self {
            timeout,
            flush_interval,
        }
    }

    /// Run `command` in `cwd` to completion.
    ///
    /// The final console flush always happens; a failing flush is logged and
    /// does not change the result.
    pub async fn run(
        &self,
        command: &CommandLine,
        cwd: &Utf8Path,
        sink: &dyn ConsoleSink,
        slot: &ProcessSlot,
    ) -> Supervised {
        let mut console = Vec::new();
        let result = match slot.install() {
            Ok(kill_rx) => {
                let result = self
                    .supervise(command, cwd, sink, kill_rx, &mut console)
                    .await;
                slot.clear();
                result
            }
            Err(e) => Err(e),
        };

        let console = String::from_utf8_lossy(&console).into_owned();
        if let Err(e) = sink.publish(&console).await {
            tracing::warn!("Failed to publish final console output: {}", e);
        }
        Supervised { console, result }
    }

    async fn supervise(
        &self,
        command: &CommandLine,
        cwd: &Utf8Path,
        sink: &dyn ConsoleSink,
        mut kill_rx: oneshot::Receiver<()>,
        console: &mut Vec<u8>,
    ) -> Result<(), ExecError> {
        tracing::info!("EXECUTING: {}", command);
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Launch {
                command: command.to_string(),
                source,
            })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out_buf = [0u8; 8192];
        let mut err_buf = [0u8; 8192];
        let mut throttle = FlushThrottle::new(self.flush_interval, Instant::now());
        let mut kill_closed = false;
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let status = loop {
            tokio::select! {
                n = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => {
                    if n == 0 {
                        stdout = None;
                    } else {
                        tracing::debug!("stdout: {}", String::from_utf8_lossy(&out_buf[..n]));
                        self.append(&out_buf[..n], console, &mut throttle, sink).await;
                    }
                }
                n = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => {
                    if n == 0 {
                        stderr = None;
                    } else {
                        tracing::debug!("stderr: {}", String::from_utf8_lossy(&err_buf[..n]));
                        self.append(&err_buf[..n], console, &mut throttle, sink).await;
                    }
                }
                status = child.wait() => break status,
                () = &mut deadline => {
                    tracing::info!("Killing process due to timeout: {}", command);
                    if let Err(e) = child.start_kill() {
                        tracing::warn!("Unable to kill timed out process: {}", e);
                    }
                    let _ = child.wait().await;
                    return Err(ExecError::Timeout);
                }
                res = &mut kill_rx, if !kill_closed => match res {
                    Ok(()) => {
                        tracing::info!("Killing process on request: {}", command);
                        if let Err(e) = child.start_kill() {
                            tracing::warn!("Unable to kill process: {}", e);
                        }
                        let _ = child.wait().await;
                        return Err(ExecError::Killed);
                    }
                    Err(_) => kill_closed = true,
                },
            }
        };

        let drain = async {
            for stream in [stdout.take().map(boxed), stderr.take().map(boxed)]
                .into_iter()
                .flatten()
            {
                let mut stream = stream;
                let mut rest = Vec::new();
                let _ = stream.read_to_end(&mut rest).await;
                console.extend_from_slice(&rest);
            }
        };
        if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
            tracing::warn!("Output pipes still open after exit: {}", command);
        }

        let status = status.map_err(ExecError::Wait)?;
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(ExecError::Exited { code }),
            None => Err(ExecError::Signaled),
        }
    }

    async fn append(
        &self,
        chunk: &[u8],
        console: &mut Vec<u8>,
        throttle: &mut FlushThrottle,
        sink: &dyn ConsoleSink,
    ) {
        console.extend_from_slice(chunk);
        if throttle.should_flush(Instant::now()) {
            if let Err(e) = sink.publish(&String::from_utf8_lossy(console)).await {
                tracing::warn!("Failed to publish console output: {}", e);
            }
        }
    }
}

fn boxed<R: AsyncRead + Unpin + Send + 'static>(r: R) -> Box<dyn AsyncRead + Unpin + Send> {
    Box::new(r)
}

/// Read from `stream`; 0 means closed (EOF or read error).
async fn read_chunk<R: AsyncRead + Unpin>(stream: &mut Option<R>, buf: &mut [u8]) -> usize {
    match stream {
        Some(s) => s.read(buf).await.unwrap_or(0),
        None => std::future::pending().await,
    }
}
