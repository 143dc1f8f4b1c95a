//! Child-process transport carrying newline-delimited frames.
//!
//! An MCP server runs as a spawned subprocess; frames travel as single
//! lines on its stdin/stdout. Stderr carries free-form diagnostics and
//! is handed to the owner for forwarding into the host's logs.
//!
//! # Environment
//!
//! When a configured environment map is supplied, it **replaces** the
//! parent environment entirely rather than being merged into it. Servers
//! needing `PATH` or `HOME` must list them explicitly. Without a map the
//! child inherits the parent environment unchanged.
//!
//! # Teardown
//!
//! [`ChildTransport::close`] follows a fixed order: close stdin (the
//! graceful shutdown signal), wait briefly for the child to exit, kill
//! it if it lingers, reap it, then drop the remaining pipes. Close is
//! idempotent; afterwards `send` fails with [`TransportError::Closed`]
//! and `receive` reports end of stream.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Grace period between closing the child's stdin and killing it.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Initial read-buffer capacity. Frames up to 1 MiB are expected; the
/// buffer grows beyond this when a peer sends larger records.
const READ_BUFFER_CAPACITY: usize = 1024 * 1024;

/// Errors raised by the child-process transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The subprocess could not be spawned.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// The command that failed to start.
        command: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A pipe read or write failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been closed.
    #[error("transport is closed")]
    Closed,
}

/// A newline-framed stdio transport to a spawned subprocess.
///
/// Sends are serialised by an internal lock; receives are expected from
/// a single reader task. All methods take `&self`, so the transport can
/// be shared behind an `Arc`.
pub struct ChildTransport {
    /// Command line, kept for diagnostics.
    command: String,

    /// Child stdin. `None` once closed.
    stdin: Mutex<Option<ChildStdin>>,

    /// Buffered child stdout. `None` once closed.
    stdout: Mutex<Option<BufReader<ChildStdout>>>,

    /// Child stderr, available for forwarding until taken.
    stderr: std::sync::Mutex<Option<ChildStderr>>,

    /// The child process handle. `None` once reaped.
    child: Mutex<Option<Child>>,

    /// Set by the first `close` call.
    closed: AtomicBool,
}

impl ChildTransport {
    /// Spawns `command` with piped stdio and wraps it in a transport.
    ///
    /// `env`, when provided, replaces the child's entire environment
    /// (see the module docs).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Spawn`] if the process cannot be
    /// started, and an I/O error if any stdio pipe is missing.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: Option<&HashMap<String, String>>,
    ) -> Result<Self, TransportError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Reap-after-exit is best effort; close() waits explicitly.
            .kill_on_drop(true);

        if let Some(env) = env {
            cmd.env_clear();
            cmd.envs(env);
        }

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("child stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("child stdout not captured"))?;
        let stderr = child.stderr.take();

        debug!(command, "spawned MCP server process");

        Ok(Self {
            command: command.to_string(),
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(Some(BufReader::with_capacity(READ_BUFFER_CAPACITY, stdout))),
            stderr: std::sync::Mutex::new(stderr),
            child: Mutex::new(Some(child)),
            closed: AtomicBool::new(false),
        })
    }

    /// Writes one frame to the child's stdin.
    ///
    /// A trailing line feed is appended when the frame lacks one;
    /// an already-terminated frame is not double-terminated. Concurrent
    /// senders are serialised.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] after `close`, or an I/O error
    /// if the write fails (e.g. the child has exited).
    pub async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;

        stdin.write_all(frame.as_bytes()).await?;
        if !frame.ends_with('\n') {
            stdin.write_all(b"\n").await?;
        }
        stdin.flush().await?;
        Ok(())
    }

    /// Reads one newline-delimited frame from the child's stdout.
    ///
    /// Returns `Ok(None)` at end of stream (child exited or transport
    /// closed). The returned frame has its line terminator stripped.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the read fails.
    pub async fn receive(&self) -> Result<Option<String>, TransportError> {
        let mut guard = self.stdout.lock().await;
        let Some(stdout) = guard.as_mut() else {
            return Ok(None);
        };

        let mut line = String::new();
        let bytes_read = stdout.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(None);
        }

        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Takes the child's stderr for diagnostic forwarding.
    ///
    /// Returns `Some` exactly once; stderr has no protocol meaning.
    pub fn take_stderr(&self) -> Option<ChildStderr> {
        self.stderr
            .lock()
            .map_or(None, |mut guard| guard.take())
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tears the child down deterministically.
    ///
    /// Idempotent: later calls return immediately. Failures during
    /// teardown are logged, not surfaced; a closing caller has nothing
    /// useful left to do with them.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping stdin signals a graceful shutdown to the child.
        self.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(command = %self.command, %status, "MCP server process exited");
                }
                Ok(Err(e)) => {
                    warn!(command = %self.command, error = %e, "failed to reap MCP server process");
                }
                Err(_) => {
                    if let Err(e) = child.start_kill() {
                        warn!(command = %self.command, error = %e, "failed to kill MCP server process");
                    }
                    match child.wait().await {
                        Ok(status) => {
                            debug!(command = %self.command, %status, "MCP server process killed");
                        }
                        Err(e) => {
                            warn!(command = %self.command, error = %e, "failed to reap MCP server process");
                        }
                    }
                }
            }
        }

        self.stdout.lock().await.take();
    }
}

impl std::fmt::Debug for ChildTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildTransport")
            .field("command", &self.command)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
