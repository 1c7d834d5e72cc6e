//! Fake `wgu` helpers built from shell scripts.

#![allow(dead_code)]

use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use wgu_ctl::{ConnectionMachine, ConnectionPhase, HelperConfig, StateSnapshot};

/// A scratch directory holding one fake helper script.
///
/// Every script records its PID in `pid` and the `-c` argument in `config_arg`
/// before running `body`. Scripts `exec` their final long-running command so
/// the recorded PID stays the process that gets killed.
pub struct FakeHelper {
    pub dir: TempDir,
    pub executable: PathBuf,
}

impl FakeHelper {
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let executable = dir.path().join("wgu");
        let script = format!(
            "#!/bin/sh\necho $$ > '{pid}'\necho \"$3\" > '{arg}'\n{body}\n",
            pid = dir.path().join("pid").display(),
            arg = dir.path().join("config_arg").display(),
            body = body,
        );
        std::fs::write(&executable, script).expect("write fake helper");
        std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake helper");
        Self { dir, executable }
    }

    /// Prints `ready` and then idles
    pub fn ready() -> Self {
        Self::new("echo ready\nexec sleep 30")
    }

    /// Never writes to stdout
    pub fn silent() -> Self {
        Self::new("exec sleep 30")
    }

    pub fn config(&self, name: &str) -> HelperConfig {
        HelperConfig::new(self.dir.path().join(name)).with_executable(&self.executable)
    }

    /// PID recorded by the script, once it has started
    pub fn pid(&self) -> Option<i32> {
        std::fs::read_to_string(self.dir.path().join("pid"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn config_arg(&self) -> Option<String> {
        std::fs::read_to_string(self.dir.path().join("config_arg"))
            .ok()
            .map(|s| s.trim().to_string())
    }

    pub async fn wait_for_pid(&self) -> i32 {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(pid) = self.pid() {
                    return pid;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("fake helper never recorded its pid")
    }
}

/// True while `pid` names a running process. Zombies count as dead.
pub fn is_alive(pid: i32) -> bool {
    if kill(Pid::from_raw(pid), None).is_err() {
        return false;
    }
    // Linux exposes the run state; elsewhere the signal check has to do
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => process_state(&stat) != Some('Z'),
        Err(_) => !Path::new("/proc/self/stat").exists(),
    }
}

/// State letter from `/proc/<pid>/stat`, which follows the parenthesised command name
fn process_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

/// Wait for `pid` to disappear; the supervisor reaps what it kills
pub async fn wait_until_gone(pid: i32) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while is_alive(pid) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("process {} still alive", pid));
}

pub async fn wait_for_phase(
    machine: &ConnectionMachine,
    phase: ConnectionPhase,
    within: Duration,
) -> StateSnapshot {
    tokio::time::timeout(within, async {
        loop {
            let state = machine.state();
            if state.phase == phase {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {} within {:?}, still {}",
            phase,
            within,
            machine.state().phase
        )
    })
}
