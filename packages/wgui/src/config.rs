use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use wgu_ctl::HelperConfig;

// =============================================================================
// Tunables (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [helper]
//                    ready_timeout_ms = 1500
//
//   env var:         WGU_HELPER__READY_TIMEOUT_MS=1500   (double underscore = nesting)

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub helper: HelperFileConfig,
    #[serde(default)]
    pub client: ClientFileConfig,
}

/// Helper invocation (lives under `[helper]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HelperFileConfig {
    /// Explicit helper binary. Unset: bundled next to `wgui`, then `PATH`.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

impl Default for HelperFileConfig {
    fn default() -> Self {
        Self {
            executable: None,
            ready_timeout_ms: default_ready_timeout_ms(),
        }
    }
}

/// Client behaviour (lives under `[client]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientFileConfig {
    /// Upper bound on waiting for the helper to be stopped at exit
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ClientFileConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_ready_timeout_ms() -> u64 {
    wgu_ctl::DEFAULT_READY_TIMEOUT.as_millis() as u64
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

/// Layer defaults → `<data_dir>/config.toml` → `WGU_*` env vars.
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("WGU_").split("__"))
}

// =============================================================================
// Runtime view
// =============================================================================

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub data_dir: PathBuf,
    pub helper_executable: PathBuf,
    pub ready_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl ClientConfig {
    /// Create the data directory if needed and resolve the layered config.
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".wgu"),
        };
        create_private_dir(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;
        debug!("Data directory: {}", data_dir.display());

        let file: FileConfig = load_config(&data_dir)
            .extract()
            .context("Failed to load configuration")?;

        Ok(Self::from_file(data_dir, &file))
    }

    pub fn from_file(data_dir: PathBuf, fc: &FileConfig) -> Self {
        let helper_executable = fc
            .helper
            .executable
            .clone()
            .unwrap_or_else(resolve_default_executable);
        info!("Helper executable: {}", helper_executable.display());

        Self {
            data_dir,
            helper_executable,
            ready_timeout: Duration::from_millis(fc.helper.ready_timeout_ms),
            shutdown_grace: Duration::from_millis(fc.client.shutdown_grace_ms),
        }
    }

    pub fn helper_config(&self, connection_config: PathBuf) -> HelperConfig {
        HelperConfig::new(connection_config)
            .with_executable(&self.helper_executable)
            .with_ready_timeout(self.ready_timeout)
    }
}

/// Bundled helper if one ships next to this binary, otherwise a `PATH` lookup
fn resolve_default_executable() -> PathBuf {
    match wgu_ctl::bundled_executable() {
        Ok(path) if path.is_file() => path,
        _ => PathBuf::from(wgu_ctl::DEFAULT_EXECUTABLE),
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}
