use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Helper binary looked up on `PATH` when no explicit executable is configured.
#[cfg(windows)]
pub const DEFAULT_EXECUTABLE: &str = "wgu.exe";
#[cfg(not(windows))]
pub const DEFAULT_EXECUTABLE: &str = "wgu";

/// How long the helper gets to print `ready` after it has been started.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything needed to bring one tunnel up
#[derive(Clone, Debug)]
pub struct HelperConfig {
    /// Helper binary; falls back to [`DEFAULT_EXECUTABLE`]
    pub executable: Option<PathBuf>,
    /// Connection config handed to `up -c`
    pub connection_config: PathBuf,
    /// Receives the helper's stderr, one line per message
    pub diagnostic_sink: Option<mpsc::Sender<String>>,
    pub ready_timeout: Duration,
}

impl HelperConfig {
    pub fn new(connection_config: impl Into<PathBuf>) -> Self {
        Self {
            executable: None,
            connection_config: connection_config.into(),
            diagnostic_sink: None,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    pub fn with_diagnostic_sink(mut self, sink: mpsc::Sender<String>) -> Self {
        self.diagnostic_sink = Some(sink);
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// The helper binary that will actually be run
    pub fn executable(&self) -> &Path {
        self.executable
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_EXECUTABLE))
    }
}

/// Path of a helper shipped alongside the running binary.
///
/// Release builds bundle `wgu` in the same directory as the client; this
/// returns that location whether or not the file exists.
pub fn bundled_executable() -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(DEFAULT_EXECUTABLE))
}
