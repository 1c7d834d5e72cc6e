use anyhow::{Context, Result, anyhow};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wgu_ctl::{ConnectionMachine, ConnectionPhase, commands};

use crate::config::ClientConfig;

/// How often the foreground loop samples the published state
const STATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bring the tunnel up and stay in the foreground until ctrl-c.
pub async fn up_command(config: &ClientConfig, connection_config: PathBuf) -> Result<()> {
    run_up(config, connection_config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, disconnecting...");
    })
    .await
}

/// Body of `up`, with the stop signal injected so it can be driven in tests.
///
/// Returns an error if the machine lands in `Error`; either way the helper is
/// stopped before returning (bounded by `shutdown_grace`).
pub(crate) async fn run_up(
    config: &ClientConfig,
    connection_config: PathBuf,
    stop: impl Future<Output = ()>,
) -> Result<()> {
    let shutdown = CancellationToken::new();
    let machine = ConnectionMachine::spawn(shutdown.clone());
    let mut diagnostics = machine.subscribe_diagnostics();

    machine
        .connect(&shutdown, config.helper_config(connection_config))
        .await
        .context("Failed to queue connect request")?;

    tokio::pin!(stop);
    let mut ticker = tokio::time::interval(STATE_POLL_INTERVAL);
    let mut last_phase = ConnectionPhase::Unknown;

    let outcome = loop {
        tokio::select! {
            _ = &mut stop => break Ok(()),
            event = diagnostics.recv() => match event {
                Ok(line) => println!("{}", line.text),
                Err(RecvError::Lagged(n)) => warn!("Dropped {} diagnostic lines", n),
                Err(RecvError::Closed) => break Ok(()),
            },
            _ = ticker.tick() => {
                let state = machine.state();
                if state.phase != last_phase {
                    eprintln!("[wgui: {}]", state.phase);
                    last_phase = state.phase;
                }
                if state.phase == ConnectionPhase::Error {
                    let reason = state
                        .last_error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown failure".to_string());
                    break Err(anyhow!("Connection failed: {}", reason));
                }
            }
        }
    };

    shutdown.cancel();
    if tokio::time::timeout(config.shutdown_grace, machine.terminated())
        .await
        .is_err()
    {
        warn!(
            "Helper did not stop within {:?}, exiting anyway",
            config.shutdown_grace
        );
    } else {
        debug!("Connection machine stopped ({})", machine.state().phase);
    }

    outcome
}

/// Print the public key of a connection config.
pub async fn pubkey_command(config: &ClientConfig, connection_config: PathBuf) -> Result<()> {
    let key = commands::public_key(&config.helper_config(connection_config))
        .await
        .context("Failed to read public key")?;
    println!("{}", key);
    Ok(())
}

/// Generate a connection config named `name`, in `dir` or the data directory.
pub async fn genconf_command(
    config: &ClientConfig,
    name: &str,
    dir: Option<&Path>,
) -> Result<()> {
    let dir = dir.unwrap_or(&config.data_dir);
    commands::generate_config(&config.helper_executable, name, dir)
        .await
        .with_context(|| format!("Failed to generate config '{}'", name))?;
    eprintln!("[wgui: generated '{}' in {}]", name, dir.display());
    Ok(())
}
