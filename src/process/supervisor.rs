//! Peer process supervision.
//!
//! Spawns a child process speaking the opposite role, binds its stdin/stdout
//! as the transport for a new [`Connection`], and owns the child's lifetime:
//!
//! - `kill_on_drop(true)` so the child never outlives the supervising scope,
//!   even on panic or early return.
//! - The child's stderr is never part of the RPC stream; a dedicated task
//!   forwards it line-by-line to `tracing` diagnostics.
//! - An unexpected child exit closes its stdout, which the bound connection
//!   observes as ordinary transport EOF and drains its pending requests.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::role::Role;
use crate::rpc::connection::{Connection, ConnectionOptions};
use crate::rpc::dispatch::HandlerSet;
use crate::{ConduitError, Result};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Configuration for spawning a peer process.
#[derive(Debug, Clone, Default)]
pub struct SpawnConfig {
    /// Executable to run.
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Environment variables set for the child.
    pub env: Vec<(String, String)>,
    /// Strip the inherited environment before applying `env`.
    ///
    /// When set, the child sees exactly `env` and nothing else — secrets in
    /// the supervisor's environment never leak into the peer.
    pub clear_env: bool,
    /// Working directory for the child; inherited when `None`.
    pub cwd: Option<PathBuf>,
    /// Connection tunables for the bound transport.
    pub options: ConnectionOptions,
}

impl SpawnConfig {
    /// Configuration running `program` with defaults for everything else.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }
}

// ── Spawning ──────────────────────────────────────────────────────────────────

/// Spawn a peer process and bind a connection to its stdio.
///
/// `role` is the role *this* side plays; the child is expected to speak the
/// opposite role on its stdin/stdout. The returned [`Connection`] is live
/// immediately; the returned [`PeerProcess`] owns the child's lifecycle.
///
/// # Errors
///
/// [`ConduitError::Spawn`] if the process cannot be started or its stdio
/// pipes cannot be captured.
pub async fn spawn_peer(
    config: &SpawnConfig,
    role: Role,
    handlers: HandlerSet,
) -> Result<(Connection, PeerProcess)> {
    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args);

    if config.clear_env {
        cmd.env_clear();
    }
    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    if let Some(cwd) = &config.cwd {
        cmd.current_dir(cwd);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| ConduitError::Spawn(format!("failed to spawn '{}': {err}", config.program)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ConduitError::Spawn("failed to capture child stdin".to_owned()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ConduitError::Spawn("failed to capture child stdout".to_owned()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ConduitError::Spawn("failed to capture child stderr".to_owned()))?;

    let pid = child.id();
    debug!(program = config.program.as_str(), pid, %role, "peer process spawned");

    let stderr_task = tokio::spawn(forward_stderr(pid, stderr));

    let connection =
        Connection::with_options(role, stdout, stdin, handlers, config.options.clone());
    let handle = PeerProcess {
        proc: Mutex::new(ProcState { child, exit: None }),
        conn: connection.clone(),
        _stderr_task: stderr_task,
    };

    Ok((connection, handle))
}

/// Forward the child's stderr to diagnostics, one line at a time.
async fn forward_stderr(pid: Option<u32>, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(pid, line = line.as_str(), "peer stderr"),
            Ok(None) => break,
            Err(err) => {
                warn!(pid, error = %err, "error reading peer stderr, stopping forwarder");
                break;
            }
        }
    }
}

// ── Process handle ────────────────────────────────────────────────────────────

/// Exclusive owner of a spawned peer process and its bound connection.
///
/// Dropping the handle kills the child (`kill_on_drop`), so the process is
/// cleaned up on every exit path. The embedded connection handle is only
/// used to close the RPC channel when the process is killed; the connection
/// itself never references the child.
#[derive(Debug)]
pub struct PeerProcess {
    proc: Mutex<ProcState>,
    conn: Connection,
    _stderr_task: JoinHandle<()>,
}

#[derive(Debug)]
struct ProcState {
    child: Child,
    exit: Option<ExitStatus>,
}

impl PeerProcess {
    /// The connection bound to the child's stdio.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Wait for the child to exit and reap it.
    ///
    /// Idempotent: the first observed exit status is cached and returned by
    /// every later call.
    ///
    /// # Errors
    ///
    /// [`ConduitError::Io`] if waiting on the process fails.
    pub async fn wait(&self) -> Result<ExitStatus> {
        let mut state = self.proc.lock().await;
        if let Some(status) = state.exit {
            return Ok(status);
        }
        let status = state
            .child
            .wait()
            .await
            .map_err(|err| ConduitError::Io(format!("wait on peer process failed: {err}")))?;
        state.exit = Some(status);
        Ok(status)
    }

    /// Kill the child and reap it.
    ///
    /// Closes the bound connection first — killing a peer whose connection
    /// is still open implicitly closes that connection. Idempotent: killing
    /// an already-exited child is a no-op.
    ///
    /// # Errors
    ///
    /// [`ConduitError::Io`] if delivering the kill or reaping fails.
    pub async fn kill(&self) -> Result<()> {
        self.conn.close().await;

        let mut state = self.proc.lock().await;
        if state.exit.is_some() {
            return Ok(());
        }
        if let Ok(Some(status)) = state.child.try_wait() {
            // Exited on its own between close and kill.
            state.exit = Some(status);
            return Ok(());
        }

        state
            .child
            .start_kill()
            .map_err(|err| ConduitError::Io(format!("kill of peer process failed: {err}")))?;
        let status = state
            .child
            .wait()
            .await
            .map_err(|err| ConduitError::Io(format!("wait after kill failed: {err}")))?;
        state.exit = Some(status);
        Ok(())
    }

    /// Orderly teardown: close the RPC channel, then terminate and reap.
    ///
    /// # Errors
    ///
    /// Propagates [`PeerProcess::kill`] failures.
    pub async fn shutdown(&self) -> Result<()> {
        self.kill().await
    }

    /// Exit status observed so far, if the child has been reaped.
    pub async fn exit_status(&self) -> Option<ExitStatus> {
        self.proc.lock().await.exit
    }
}
