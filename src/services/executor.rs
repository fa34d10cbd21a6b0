use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;

/// Upper bound on captured output per stream; the tail is kept.
const MAX_CAPTURE: usize = 64 * 1024;

/// How long to keep draining pipes after the process is gone. A grandchild
/// holding the pipe open must not stall the caller.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Program not found: {command}")]
    NotFound { command: String },

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// One finished run of an external program.
#[derive(Debug, Clone)]
pub struct ProcessInvocation {
    pub command: String,
    pub args: Vec<String>,
    /// `None` when the process was killed (timeout or signal)
    pub exit_status: Option<i32>,
    /// Captured stderr
    pub diagnostic_output: String,
    pub stdout: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessInvocation {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_status == Some(0)
    }

    /// Best available explanation of what the program said: stderr, else stdout.
    pub fn diagnostics(&self) -> &str {
        let stderr = self.diagnostic_output.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Runs external programs. A non-zero exit is reported through
/// [`ProcessInvocation::exit_status`], never as an error; only a failure to
/// start the program is an `Err`.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ProcessInvocation, ExecutorError>;
}

#[derive(Debug, Default, Clone)]
pub struct TokioProcessExecutor;

impl TokioProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

async fn capture<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut kept: Vec<u8> = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                kept.extend_from_slice(&buf[..n]);
                if kept.len() > MAX_CAPTURE {
                    let excess = kept.len() - MAX_CAPTURE;
                    kept.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}

async fn drain(task: Option<tokio::task::JoinHandle<String>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::warn!("Output capture task failed: {}", e);
            String::new()
        }
        Err(_) => {
            tracing::warn!("Output pipe still open {:?} after exit, giving up", DRAIN_GRACE);
            task.abort();
            String::new()
        }
    }
}

#[async_trait]
impl ProcessExecutor for TokioProcessExecutor {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        limit: Duration,
    ) -> Result<ProcessInvocation, ExecutorError> {
        tracing::info!("⚙️  Running {} {:?} (timeout {:?})", command, args, limit);
        let started = Instant::now();

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExecutorError::NotFound {
                        command: command.to_string(),
                    }
                } else {
                    ExecutorError::Spawn {
                        command: command.to_string(),
                        source: e,
                    }
                }
            })?;

        // Both pipes are drained while waiting so a chatty child cannot block on a full pipe.
        let stdout_task = child.stdout.take().map(|s| tokio::spawn(capture(s)));
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(capture(s)));

        let (exit_status, timed_out) = match timeout(limit, child.wait()).await {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => {
                tracing::error!("Failed waiting on {}: {}", command, e);
                (None, false)
            }
            Err(_) => {
                tracing::warn!("⏱️  {} exceeded {:?}, killing", command, limit);
                if let Err(e) = child.kill().await {
                    tracing::error!("Failed to kill {}: {}", command, e);
                }
                (None, true)
            }
        };

        let stdout = drain(stdout_task).await;
        let diagnostic_output = drain(stderr_task).await;

        let invocation = ProcessInvocation {
            command: command.to_string(),
            args: args.to_vec(),
            exit_status,
            diagnostic_output,
            stdout,
            timed_out,
            elapsed: started.elapsed(),
        };

        tracing::info!(
            "{} {} finished in {:?} (exit={:?}, timed_out={})",
            if invocation.succeeded() { "✅" } else { "❌" },
            command,
            invocation.elapsed,
            invocation.exit_status,
            invocation.timed_out
        );
        Ok(invocation)
    }
}
