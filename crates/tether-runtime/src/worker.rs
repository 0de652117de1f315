//! Worker process supervision.
//!
//! One [`Worker`] is one live OS process running a built function through the
//! runtime shim. Its stdout and stderr are merged into a single [`LogStream`]
//! that ends only after both pipes are fully drained.

use crate::error::WorkerError;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Environment variable carrying the invocation endpoint to the worker.
pub const RUNTIME_API_ENV: &str = "AWS_LAMBDA_RUNTIME_API";

/// Parent variables forwarded explicitly so debuggers attach to workers.
const PASSTHROUGH_ENV: &[&str] = &["NODE_OPTIONS", "VSCODE_INSPECTOR_OPTIONS"];

const LOG_QUEUE_CAPACITY: usize = 1024;

/// Program and leading arguments used to start a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `node --enable-source-maps <shim>`
    pub fn node(shim: impl AsRef<Path>) -> Self {
        Self::new(
            "node",
            [
                "--enable-source-maps".to_string(),
                shim.as_ref().display().to_string(),
            ],
        )
    }
}

/// One worker launch.
#[derive(Debug, Clone)]
pub struct RunInput {
    pub worker_id: String,
    pub function_id: String,
    /// Handed to the shim, usually `<out_dir>/<handler>`
    pub artifact: PathBuf,
    /// Build output directory; the process runs there
    pub working_dir: PathBuf,
    /// Invocation endpoint exported as [`RUNTIME_API_ENV`]
    pub server: String,
    /// Function environment layered over the parent's
    pub env: HashMap<String, String>,
}

/// Spawns worker processes.
#[derive(Debug, Clone)]
pub struct WorkerSupervisor {
    command: WorkerCommand,
}

impl WorkerSupervisor {
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    /// Starts `<program> <args...> <artifact> <worker_id>`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run(&self, input: RunInput) -> Result<Worker, WorkerError> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .arg(&input.artifact)
            .arg(&input.worker_id)
            .current_dir(&input.working_dir)
            .envs(&input.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for name in PASSTHROUGH_ENV {
            if let Ok(value) = std::env::var(name) {
                cmd.env(name, value);
            }
        }
        cmd.env(RUNTIME_API_ENV, &input.server);

        let mut child = cmd.spawn().map_err(|source| WorkerError::Spawn {
            worker_id: input.worker_id.clone(),
            program: self.command.program.clone(),
            source,
        })?;

        tracing::info!(
            worker_id = %input.worker_id,
            function_id = %input.function_id,
            pid = child.id(),
            server = %input.server,
            "starting worker"
        );

        let pipes = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => Some((stdout, stderr)),
            _ => None,
        };

        Ok(Worker {
            id: input.worker_id,
            function_id: input.function_id,
            child,
            pipes,
            stopped: false,
        })
    }
}

/// Which pipe a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub source: LogSource,
    /// Raw bytes without the line terminator (`\n` or `\r\n`)
    pub line: Vec<u8>,
}

impl LogLine {
    /// Line content as text, invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.line)
    }
}

/// Combined stdout/stderr lines of one worker.
#[derive(Debug)]
pub struct LogStream {
    rx: mpsc::Receiver<LogLine>,
}

impl LogStream {
    pub async fn next_line(&mut self) -> Option<LogLine> {
        self.rx.recv().await
    }
}

impl Stream for LogStream {
    type Item = LogLine;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// A running worker process.
///
/// Dropping a `Worker` does not kill the process; call [`Worker::stop`].
#[derive(Debug)]
pub struct Worker {
    id: String,
    function_id: String,
    child: Child,
    pipes: Option<(tokio::process::ChildStdout, tokio::process::ChildStderr)>,
    stopped: bool,
}

impl Worker {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn function_id(&self) -> &str {
        &self.function_id
    }

    /// OS process id, `None` once the process has been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Takes the combined log stream. Only the first call succeeds.
    pub fn logs(&mut self) -> Result<LogStream, WorkerError> {
        let (stdout, stderr) = self
            .pipes
            .take()
            .ok_or_else(|| WorkerError::LogsTaken(self.id.clone()))?;

        let (tx, rx) = mpsc::channel(LOG_QUEUE_CAPACITY);
        tokio::spawn(pump(stdout, LogSource::Stdout, tx.clone()));
        tokio::spawn(pump(stderr, LogSource::Stderr, tx));
        Ok(LogStream { rx })
    }

    /// Kills the process and reaps it. Calling it again is a no-op.
    pub async fn stop(&mut self) -> Result<(), WorkerError> {
        if self.stopped {
            return Ok(());
        }
        match self.child.start_kill() {
            Ok(()) => {}
            // Already exited and reaped
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(source) => {
                return Err(WorkerError::Process {
                    worker_id: self.id.clone(),
                    source,
                });
            }
        }
        self.wait().await?;
        self.stopped = true;
        tracing::debug!(worker_id = %self.id, "worker stopped");
        Ok(())
    }

    /// Waits for the process to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus, WorkerError> {
        self.child.wait().await.map_err(|source| WorkerError::Process {
            worker_id: self.id.clone(),
            source,
        })
    }
}

/// Forwards lines from one pipe until EOF.
///
/// Keeps draining after the receiver is gone so the child never blocks on a
/// full pipe.
async fn pump<R>(pipe: R, source: LogSource, tx: mpsc::Sender<LogLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut forwarding = true;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if !forwarding {
                    continue;
                }
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = LogLine {
                    source,
                    line: std::mem::take(&mut buf),
                };
                if tx.send(line).await.is_err() {
                    forwarding = false;
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, ?source, "worker pipe closed");
                break;
            }
        }
    }
}
