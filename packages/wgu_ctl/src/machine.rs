use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, info, warn};

use crate::config::HelperConfig;
use crate::diagnostics::{self, DiagnosticLine, DiagnosticLog};
use crate::error::{FailureKind, MachineError, SupervisorError};
use crate::supervisor::ProcessHandle;

/// Pending intents a machine will hold before `connect`/`disconnect` wait
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Forwarded stderr lines retained per machine
pub const DEFAULT_DIAGNOSTIC_LINES: usize = 1000;

const DIAGNOSTIC_CHANNEL_CAPACITY: usize = 256;

/// Where a connection currently stands
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub enum ConnectionPhase {
    /// Placeholder before the machine publishes its first state
    #[default]
    Unknown,
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

impl ConnectionPhase {
    /// `Connecting` and `Disconnecting` only last while work is in flight
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Phase and error as published together by the event loop
#[derive(Clone, Debug, Default)]
pub struct StateSnapshot {
    pub phase: ConnectionPhase,
    pub last_error: Option<Arc<SupervisorError>>,
}

/// Tunables for [`ConnectionMachine::with_options`]
#[derive(Clone, Debug)]
pub struct MachineOptions {
    pub queue_capacity: usize,
    pub diagnostic_lines: usize,
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            diagnostic_lines: DEFAULT_DIAGNOSTIC_LINES,
        }
    }
}

/// Requests consumed by the event loop, one at a time
#[derive(Debug)]
enum Intent {
    Connect { config: HelperConfig },
    Disconnect,
}

/// Handle to a connection state machine.
///
/// All process work happens on a single background task; this handle only
/// queues intents and reads what that task has published. Dropping every
/// handle (or cancelling the governing token) stops the loop, killing any
/// running helper on the way out.
pub struct ConnectionMachine {
    intents: mpsc::Sender<Intent>,
    snapshot: Arc<RwLock<StateSnapshot>>,
    diagnostics: Arc<RwLock<DiagnosticLog>>,
    diagnostic_events: broadcast::Sender<DiagnosticLine>,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl ConnectionMachine {
    /// Start a machine with default options. Must be called within a Tokio runtime.
    pub fn spawn(cancel: CancellationToken) -> Self {
        Self::with_options(cancel, MachineOptions::default())
    }

    pub fn with_options(cancel: CancellationToken, options: MachineOptions) -> Self {
        let (intents, receiver) = mpsc::channel(options.queue_capacity.max(1));
        let (sink, sink_rx) = mpsc::channel(DIAGNOSTIC_CHANNEL_CAPACITY);
        let (diagnostic_events, _) = broadcast::channel(DIAGNOSTIC_CHANNEL_CAPACITY);

        let snapshot = Arc::new(RwLock::new(StateSnapshot {
            phase: ConnectionPhase::Disconnected,
            last_error: None,
        }));
        let diagnostics = Arc::new(RwLock::new(DiagnosticLog::new(options.diagnostic_lines)));
        let done = CancellationToken::new();

        tokio::spawn(diagnostics::collect(
            sink_rx,
            diagnostics.clone(),
            diagnostic_events.clone(),
            cancel.clone(),
        ));

        let actor = MachineActor {
            receiver,
            snapshot: snapshot.clone(),
            process: None,
            sink,
            cancel: cancel.clone(),
        };
        let finished = done.clone().drop_guard();
        tokio::spawn(async move {
            let _finished = finished;
            actor.run().await;
        });

        Self {
            intents,
            snapshot,
            diagnostics,
            diagnostic_events,
            cancel,
            done,
        }
    }

    /// Queue a connect; returns once queued, not once connected.
    ///
    /// Any helper already running is killed before the new one starts.
    pub async fn connect(
        &self,
        cancel: &CancellationToken,
        config: HelperConfig,
    ) -> Result<(), MachineError> {
        self.submit(cancel, Intent::Connect { config }).await
    }

    /// Queue a disconnect; a no-op for the loop when nothing is running.
    pub async fn disconnect(&self, cancel: &CancellationToken) -> Result<(), MachineError> {
        self.submit(cancel, Intent::Disconnect).await
    }

    async fn submit(&self, cancel: &CancellationToken, intent: Intent) -> Result<(), MachineError> {
        debug!("Queueing {:?}", intent);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MachineError::Cancelled),
            _ = self.cancel.cancelled() => Err(MachineError::Cancelled),
            sent = self.intents.send(intent) => sent.map_err(|_| MachineError::Closed),
        }
    }

    /// Latest published phase and error. Never blocks on in-flight work.
    pub fn state(&self) -> StateSnapshot {
        self.snapshot.read().clone()
    }

    /// Retained helper stderr, oldest first
    pub fn diagnostics(&self) -> Vec<DiagnosticLine> {
        self.diagnostics.read().lines()
    }

    pub fn diagnostics_text(&self) -> String {
        self.diagnostics.read().text()
    }

    /// Receive every stderr line forwarded from now on
    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<DiagnosticLine> {
        self.diagnostic_events.subscribe()
    }

    /// Resolves once the event loop has exited and any helper has been stopped
    pub fn terminated(&self) -> WaitForCancellationFutureOwned {
        self.done.clone().cancelled_owned()
    }

    pub fn is_terminated(&self) -> bool {
        self.done.is_cancelled()
    }
}

/// The event loop. Sole owner of the running helper.
struct MachineActor {
    receiver: mpsc::Receiver<Intent>,
    snapshot: Arc<RwLock<StateSnapshot>>,
    process: Option<ProcessHandle>,
    sink: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl MachineActor {
    async fn run(mut self) {
        info!("Connection machine started");

        loop {
            let intent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                intent = self.receiver.recv() => match intent {
                    Some(intent) => intent,
                    None => break,
                },
            };
            self.handle(intent).await;
        }

        // Stop accepting intents before the final teardown
        self.receiver.close();

        if self.process.is_some() {
            info!("Connection machine shutting down, stopping helper");
            match self.disconnect().await {
                Ok(()) => self.publish(ConnectionPhase::Disconnected, None),
                Err(e) => {
                    warn!("Failed to stop helper during shutdown: {}", e);
                    self.publish(ConnectionPhase::Error, Some(e));
                }
            }
        } else if self.interrupted_by_shutdown() {
            // A handshake cut short by shutdown left nothing running
            self.publish(ConnectionPhase::Disconnected, None);
        }

        info!("Connection machine stopped");
    }

    async fn handle(&mut self, intent: Intent) {
        match intent {
            Intent::Connect { config } => {
                self.publish(ConnectionPhase::Connecting, None);
                match self.connect(config).await {
                    Ok(()) => self.publish(ConnectionPhase::Connected, None),
                    Err(e) => self.publish(ConnectionPhase::Error, Some(e)),
                }
            }
            Intent::Disconnect => {
                self.publish(ConnectionPhase::Disconnecting, None);
                match self.disconnect().await {
                    Ok(()) => self.publish(ConnectionPhase::Disconnected, None),
                    Err(e) => self.publish(ConnectionPhase::Error, Some(e)),
                }
            }
        }
    }

    async fn connect(&mut self, mut config: HelperConfig) -> Result<(), SupervisorError> {
        if let Some(mut previous) = self.process.take() {
            info!("Superseding helper {:?}", previous.id());
            if let Err(e) = previous.terminate().await {
                warn!("Failed to stop superseded helper: {}", e);
            }
        }

        if config.diagnostic_sink.is_none() {
            config.diagnostic_sink = Some(self.sink.clone());
        }

        let process = ProcessHandle::spawn(&self.cancel, &config).await?;
        self.process = Some(process);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SupervisorError> {
        // The handle is discarded even when the kill fails
        let Some(mut process) = self.process.take() else {
            debug!("Disconnect requested with no helper running");
            return Ok(());
        };
        info!("Stopping helper {:?}", process.id());
        process.terminate().await
    }

    fn interrupted_by_shutdown(&self) -> bool {
        let snapshot = self.snapshot.read();
        snapshot.phase == ConnectionPhase::Error
            && snapshot
                .last_error
                .as_ref()
                .is_some_and(|e| e.kind() == FailureKind::Cancelled)
    }

    fn publish(&self, phase: ConnectionPhase, error: Option<SupervisorError>) {
        let mut snapshot = self.snapshot.write();
        debug!("Connection phase: {} -> {}", snapshot.phase, phase);
        *snapshot = StateSnapshot {
            phase,
            last_error: error.map(Arc::new),
        };
    }
}
