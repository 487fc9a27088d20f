//! Transport and process supervision: spawn the cmake server child,
//! connect to its pipe, and watch for exit.
//!
//! One client owns one child and one duplex pipe connection; there is no
//! reconnection. The child's stdout/stderr are diagnostic only and are
//! drained into the log — protocol data travels exclusively over the
//! dedicated pipe.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};

use mortar_types::StartupError;

#[cfg(unix)]
use tokio::net::UnixStream;
#[cfg(windows)]
use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient};

/// The duplex protocol connection to the server.
#[cfg(unix)]
pub type PipeStream = UnixStream;
#[cfg(windows)]
pub type PipeStream = NamedPipeClient;

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Total connection budget of 15s; server startup can be slow on loaded
/// machines.
const CONNECT_ATTEMPTS: u32 = 150;

/// How a server child terminated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub exit_code: Option<i32>,
    /// Terminating signal, if the platform reports one.
    pub signal: Option<i32>,
}

enum MonitorCommand {
    Kill,
}

/// Handle to a running server child: an exit watch plus a kill switch.
///
/// The [`Child`] itself lives in a monitor task; dropping this handle
/// kills the child (the kill switch closing doubles as `kill_on_drop`).
pub struct ServerProcess {
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    kill_tx: Option<oneshot::Sender<MonitorCommand>>,
}

impl std::fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerProcess")
            .field("exit_info", &self.exit_info())
            .finish_non_exhaustive()
    }
}

impl ServerProcess {
    /// A receiver that publishes `Some(ExitInfo)` once the child exits.
    #[must_use]
    pub fn exit_watch(&self) -> watch::Receiver<Option<ExitInfo>> {
        self.exit_rx.clone()
    }

    /// Exit info if the child has already terminated.
    #[must_use]
    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    /// Wait for the child to terminate.
    pub async fn wait_exited(&mut self) -> ExitInfo {
        match self.exit_rx.wait_for(Option::is_some).await {
            Ok(guard) => (*guard).unwrap_or_default(),
            // Monitor task gone; nothing more to learn.
            Err(_) => ExitInfo::default(),
        }
    }

    /// Kill the child if it is still running and wait for it to go away.
    /// Safe to call after the child already exited, and more than once.
    pub async fn shutdown(&mut self) -> ExitInfo {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(MonitorCommand::Kill);
        }
        self.wait_exited().await
    }
}

fn drain_diagnostics<R: AsyncRead + Unpin + Send + 'static>(stream: R, label: &'static str) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "mortar::server_output", "{label}: {line}");
        }
    });
}

fn exit_info_from(status: std::process::ExitStatus) -> ExitInfo {
    #[cfg(unix)]
    let signal = std::os::unix::process::ExitStatusExt::signal(&status);
    #[cfg(not(unix))]
    let signal = None;
    ExitInfo {
        exit_code: status.code(),
        signal,
    }
}

async fn monitor(
    mut child: Child,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    kill_rx: oneshot::Receiver<MonitorCommand>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // Explicit kill, or the owning handle was dropped.
        _ = kill_rx => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    let info = match status {
        Ok(status) => {
            let info = exit_info_from(status);
            if !status.success() {
                tracing::warn!(code = ?info.exit_code, signal = ?info.signal, "cmake server exited abnormally");
            }
            info
        }
        Err(e) => {
            tracing::warn!("failed to reap cmake server: {e}");
            ExitInfo::default()
        }
    };
    let _ = exit_tx.send(Some(info));
}

#[cfg(unix)]
async fn connect_pipe(pipe_path: &Path) -> std::io::Result<PipeStream> {
    UnixStream::connect(pipe_path).await
}

#[cfg(windows)]
async fn connect_pipe(pipe_path: &Path) -> std::io::Result<PipeStream> {
    ClientOptions::new().open(pipe_path)
}

/// Launch `<server> -E server --experimental --pipe=<path>` and connect to
/// the pipe once the child has created it.
///
/// On any failure the child is not left running: spawn errors never forked,
/// early exits are reported with their exit code, and a connect timeout
/// kills the child before returning.
pub async fn spawn_server(
    server_exe: &Path,
    pipe_path: &Path,
    environment: &[(String, String)],
) -> Result<(ServerProcess, PipeStream), StartupError> {
    let mut cmd = Command::new(server_exe);
    cmd.arg("-E")
        .arg("server")
        .arg("--experimental")
        .arg(format!("--pipe={}", pipe_path.display()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in environment {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|e| StartupError {
        message: format!("failed to spawn {}: {e}", server_exe.display()),
        exit_code: None,
    })?;

    if let Some(stdout) = child.stdout.take() {
        drain_diagnostics(stdout, "stdout");
    }
    if let Some(stderr) = child.stderr.take() {
        drain_diagnostics(stderr, "stderr");
    }

    let (exit_tx, exit_rx) = watch::channel(None);
    let (kill_tx, kill_rx) = oneshot::channel();
    tokio::spawn(monitor(child, exit_tx, kill_rx));

    let mut process = ServerProcess {
        exit_rx,
        kill_tx: Some(kill_tx),
    };

    for _ in 0..CONNECT_ATTEMPTS {
        if let Some(info) = process.exit_info() {
            return Err(StartupError {
                message: "cmake server exited before its pipe became connectable".to_string(),
                exit_code: info.exit_code,
            });
        }
        match connect_pipe(pipe_path).await {
            Ok(stream) => return Ok((process, stream)),
            Err(_) => tokio::time::sleep(CONNECT_RETRY_DELAY).await,
        }
    }

    process.shutdown().await;
    Err(StartupError {
        message: format!("pipe {} never became connectable", pipe_path.display()),
        exit_code: None,
    })
}
