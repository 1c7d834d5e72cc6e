use std::io;
use std::process::ExitStatus;
use std::time::Duration;

/// Coarse classification of a [`SupervisorError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Spawn,
    ProtocolViolation,
    Timeout,
    UnexpectedExit,
    Termination,
    Cancelled,
}

/// Errors raised while starting, verifying or stopping the helper process
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The OS could not create the process or wire one of its pipes
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The first line on stdout was not the ready signal
    #[error("expected 'ready' on stdout, got {line:?}")]
    ProtocolViolation { line: String },

    /// Nothing conclusive happened before the readiness deadline
    #[error("timed out after {}ms waiting for the helper to become ready", .timeout.as_millis())]
    Timeout { timeout: Duration },

    /// The process exited (or closed stdout) before the handshake completed
    #[error("{}", describe_exit(.status.as_ref()))]
    UnexpectedExit { status: Option<ExitStatus> },

    /// Killing the process could not be confirmed
    #[error("failed to terminate helper: {source}")]
    Termination {
        #[source]
        source: io::Error,
    },

    /// The governing cancellation token fired mid-operation
    #[error("operation cancelled")]
    Cancelled,
}

impl SupervisorError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Spawn { .. } => FailureKind::Spawn,
            Self::ProtocolViolation { .. } => FailureKind::ProtocolViolation,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::UnexpectedExit { .. } => FailureKind::UnexpectedExit,
            Self::Termination { .. } => FailureKind::Termination,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }
}

fn describe_exit(status: Option<&ExitStatus>) -> String {
    match status {
        Some(status) if !status.success() => {
            format!("helper exited unexpectedly while waiting for 'ready': {}", status)
        }
        _ => "helper exited without producing ready signal".to_string(),
    }
}

/// Errors returned when submitting an intent to a connection machine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MachineError {
    #[error("cancelled before the request could be queued")]
    Cancelled,

    #[error("connection machine has shut down")]
    Closed,
}

/// Errors from the one-shot helper commands (`pubkeyconf`, `genconf`)
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to execute '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("'{command}' failed with {status} - stderr: '{stderr}'")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}
