use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::HelperConfig;
use crate::error::SupervisorError;

/// The exact first line a healthy helper prints on stdout.
pub const READY_SIGNAL: &str = "ready";

/// A running helper that has completed the readiness handshake.
///
/// The process is killed when the handle is dropped; [`ProcessHandle::terminate`]
/// does the same but reports whether the kill went through.
pub struct ProcessHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    pid: Option<u32>,
    // Stops stderr forwarding and the stdout drain once the handle goes away
    _forwarding: DropGuard,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("stdin_open", &self.stdin.is_some())
            .finish()
    }
}

/// Outcome of the first event observed after start-up
enum Handshake {
    Cancelled,
    Line(io::Result<Option<String>>),
    Exited(io::Result<ExitStatus>),
    TimedOut,
}

impl ProcessHandle {
    /// Start `<executable> up -c <connection_config>` and wait for it to report ready.
    ///
    /// On every failure the process has already been killed and reaped by
    /// the time the error is returned.
    pub async fn spawn(
        cancel: &CancellationToken,
        config: &HelperConfig,
    ) -> Result<ProcessHandle, SupervisorError> {
        let program = config.executable().display().to_string();

        info!(
            "Spawning helper: {} up -c {}",
            program,
            config.connection_config.display()
        );

        let stderr = if config.diagnostic_sink.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let mut child = Command::new(config.executable())
            .arg("up")
            .arg("-c")
            .arg(&config.connection_config)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: program.clone(),
                source,
            })?;

        let pid = child.id();
        info!("Helper process started with PID: {:?}", pid);

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                reap(&mut child).await;
                return Err(SupervisorError::Spawn {
                    program,
                    source: io::Error::other("stdio pipes were not created"),
                });
            }
        };

        let forwarding = cancel.child_token();
        if let Some(sink) = config.diagnostic_sink.clone() {
            match child.stderr.take() {
                Some(stderr) => {
                    tokio::spawn(forward_diagnostics(stderr, sink, forwarding.clone()));
                }
                None => {
                    reap(&mut child).await;
                    return Err(SupervisorError::Spawn {
                        program,
                        source: io::Error::other("stderr pipe was not created"),
                    });
                }
            }
        }
        match await_ready(&mut child, stdout, config.ready_timeout, cancel).await {
            Ok(stdout) => {
                info!("Helper {:?} reported ready", pid);
                // stdout must stay open while the helper runs
                tokio::spawn(drain_stdout(stdout, forwarding.clone()));
                Ok(ProcessHandle {
                    child,
                    stdin: Some(stdin),
                    pid,
                    _forwarding: forwarding.drop_guard(),
                })
            }
            Err(err) => {
                warn!("Helper {:?} failed to become ready: {}", pid, err);
                forwarding.cancel();
                drop(stdin);
                reap(&mut child).await;
                Err(err)
            }
        }
    }

    /// OS process id, if the process has not been reaped yet
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Close stdin, then kill the process. Safe to call more than once.
    pub async fn terminate(&mut self) -> Result<(), SupervisorError> {
        // A closed stdin is the helper's hint that shutdown is intended
        drop(self.stdin.take());

        kill_and_reap(&mut self.child)
            .await
            .map_err(|source| SupervisorError::Termination { source })
    }
}

/// Wait for the handshake, handing stdout back on success.
async fn await_ready(
    child: &mut Child,
    stdout: ChildStdout,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Lines<BufReader<ChildStdout>>, SupervisorError> {
    let deadline = Instant::now() + timeout;
    let mut lines = BufReader::new(stdout).lines();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Handshake::Cancelled,
        line = lines.next_line() => Handshake::Line(line),
        status = child.wait() => Handshake::Exited(status),
        _ = tokio::time::sleep_until(deadline) => Handshake::TimedOut,
    };

    match outcome {
        Handshake::Line(Ok(Some(line))) if line == READY_SIGNAL => Ok(lines),
        Handshake::Line(Ok(Some(line))) => Err(SupervisorError::ProtocolViolation { line }),
        Handshake::Line(Ok(None)) => {
            // stdout closed; the exit status usually follows right behind
            debug!("Helper closed stdout before the handshake");
            let status = tokio::time::timeout_at(deadline, child.wait())
                .await
                .ok()
                .and_then(Result::ok);
            Err(SupervisorError::UnexpectedExit { status })
        }
        Handshake::Line(Err(e)) => Err(SupervisorError::ProtocolViolation {
            line: format!("<unreadable: {}>", e),
        }),
        Handshake::Exited(Ok(status)) => Err(SupervisorError::UnexpectedExit {
            status: Some(status),
        }),
        Handshake::Exited(Err(e)) => {
            warn!("Failed to wait on helper: {}", e);
            Err(SupervisorError::UnexpectedExit { status: None })
        }
        Handshake::TimedOut => Err(SupervisorError::Timeout { timeout }),
        Handshake::Cancelled => Err(SupervisorError::Cancelled),
    }
}

async fn kill_and_reap(child: &mut Child) -> io::Result<()> {
    if let Some(status) = child.try_wait()? {
        debug!("Helper already exited with status: {}", status);
        return Ok(());
    }
    child.kill().await?;
    info!("Helper process killed");
    Ok(())
}

/// Read and discard stdout after the handshake until EOF or cancellation.
async fn drain_stdout(mut lines: Lines<BufReader<ChildStdout>>, cancel: CancellationToken) {
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => debug!("Helper stdout: {}", line),
            Ok(None) => break,
            Err(e) => {
                debug!("Error reading helper stdout: {}", e);
                break;
            }
        }
    }
}

/// Best-effort kill used on the handshake failure paths.
async fn reap(child: &mut Child) {
    if let Err(e) = kill_and_reap(child).await {
        warn!("Failed to kill helper after failed start: {}", e);
    }
}

/// Copy `stream` line by line into `sink` until EOF or cancellation.
///
/// Every send races `cancel`, so a sink nobody drains cannot hold teardown up.
pub async fn forward_diagnostics<R>(
    stream: R,
    sink: mpsc::Sender<String>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = sink.send(line) => {
                        if sent.is_err() {
                            debug!("Diagnostic sink closed");
                            break;
                        }
                    }
                }
            }
            Ok(None) => {
                debug!("Helper stderr reached EOF");
                break;
            }
            Err(e) => {
                warn!("Error reading helper stderr: {}", e);
                break;
            }
        }
    }

    debug!("Diagnostic forwarder exiting");
}
