//! One-shot helper invocations that need no handshake.

use std::ffi::OsStr;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::config::HelperConfig;
use crate::error::CommandError;

/// Run the helper with `args`, returning stdout on success.
async fn run_helper<I, S>(executable: &Path, args: I) -> Result<String, CommandError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
    let command = describe(executable, &args);
    debug!("Running helper command: {}", command);

    let output = Command::new(executable)
        .args(&args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| CommandError::Io {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(CommandError::Failed {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn describe(executable: &Path, args: &[std::ffi::OsString]) -> String {
    let mut command = executable.display().to_string();
    for arg in args {
        command.push(' ');
        command.push_str(&arg.to_string_lossy());
    }
    command
}

/// Public key for the connection config in `config`, via `pubkeyconf`
pub async fn public_key(config: &HelperConfig) -> Result<String, CommandError> {
    let stdout = run_helper(
        config.executable(),
        [OsStr::new("pubkeyconf"), config.connection_config.as_os_str()],
    )
    .await?;
    Ok(stdout.trim().to_string())
}

/// Write a default connection config named `name` into `dir`, via `genconf`
pub async fn generate_config(
    executable: &Path,
    name: &str,
    dir: &Path,
) -> Result<(), CommandError> {
    run_helper(
        executable,
        [
            OsStr::new("genconf"),
            OsStr::new("-n"),
            OsStr::new(name),
            dir.as_os_str(),
        ],
    )
    .await?;
    Ok(())
}
