//! Pid file written by `conductor start`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonState {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub config_path: Option<PathBuf>,
}

impl DaemonState {
    /// State describing the current process.
    pub fn current(config_path: Option<PathBuf>) -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
            config_path,
        }
    }

    /// Read the state file. A missing file means no daemon was started.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        let state = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse daemon state {}", path.display()))?;
        Ok(Some(state))
    }

    /// Read the state file, ignoring it when the recorded process is gone.
    pub fn read_live(path: &Path) -> Result<Option<Self>> {
        Ok(Self::read(path)?.filter(Self::is_alive))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize daemon state")?;
        std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Remove the state file if it exists.
    pub fn remove(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    fn pid(&self) -> Option<Pid> {
        i32::try_from(self.pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
    }

    /// Whether the recorded process still exists.
    pub fn is_alive(&self) -> bool {
        match self.pid() {
            // EPERM means the process exists but belongs to someone else
            Some(pid) => matches!(kill(pid, None), Ok(()) | Err(Errno::EPERM)),
            None => false,
        }
    }

    /// Ask the daemon to shut down gracefully.
    pub fn terminate(&self) -> Result<()> {
        let Some(pid) = self.pid() else {
            bail!("Invalid pid {} in daemon state", self.pid);
        };
        kill(pid, Signal::SIGTERM).with_context(|| format!("Failed to signal process {}", self.pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_liveness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/daemon.json");
        assert!(DaemonState::read(&path).unwrap().is_none());

        let state = DaemonState::current(Some(PathBuf::from("conductor.yaml")));
        state.write(&path).unwrap();
        let read = DaemonState::read(&path).unwrap().unwrap();
        assert_eq!(read, state);
        assert!(read.is_alive());
        assert!(DaemonState::read_live(&path).unwrap().is_some());

        DaemonState::remove(&path).unwrap();
        DaemonState::remove(&path).unwrap();
        assert!(DaemonState::read(&path).unwrap().is_none());
    }

    #[test]
    fn test_stale_state_is_not_live() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.json");
        let stale = DaemonState {
            pid: 0,
            started_at: Utc::now(),
            config_path: None,
        };
        stale.write(&path).unwrap();
        assert!(!stale.is_alive());
        assert!(DaemonState::read_live(&path).unwrap().is_none());
        assert!(stale.terminate().is_err());
    }
}
