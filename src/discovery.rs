//! Discovery handoff between the in-host agent and the broker
//!
//! The agent writes `<project>/Library/MCPInstance.json` when it starts
//! listening, overwrites it after each host reload, and deletes it on clean
//! shutdown. The broker walks upward from its starting directory to find
//! the project root (the first directory containing `Library/`), reads the
//! record, and checks that the recorded pid is still alive before trusting
//! the port. A stale file after abnormal termination is expected and must
//! be ignored.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DISCOVERY_DIR: &str = "Library";
pub const DISCOVERY_FILE: &str = "MCPInstance.json";

/// The handoff record. If this file exists, the agent intends to be
/// reachable at `port` on loopback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub port: u16,
    pub pid: u32,
    #[serde(rename = "projectPath")]
    pub project_path: String,
}

/// Path of the discovery file under a project root.
pub fn discovery_path(project_root: &Path) -> PathBuf {
    project_root.join(DISCOVERY_DIR).join(DISCOVERY_FILE)
}

/// Write (or overwrite) the record, pretty-printed.
pub fn write_record(project_root: &Path, port: u16) -> Result<DiscoveryRecord> {
    let record = DiscoveryRecord {
        port,
        pid: std::process::id(),
        project_path: project_root.to_string_lossy().to_string(),
    };

    let path = discovery_path(project_root);
    crate::storage::write_json_pretty(&path, &record)
        .with_context(|| format!("Failed to write discovery record at {}", path.display()))?;

    crate::logging::info(&format!(
        "Discovery record written: port={} pid={} at {}",
        record.port,
        record.pid,
        path.display()
    ));
    Ok(record)
}

/// Remove the record. Missing file is not an error.
pub fn delete_record(project_root: &Path) {
    let path = discovery_path(project_root);
    if std::fs::remove_file(&path).is_ok() {
        crate::logging::info(&format!("Discovery record removed: {}", path.display()));
    }
}

/// Read and validate the record under a project root.
///
/// Fails if the file is absent, malformed, or carries a zero port.
pub fn read_record(project_root: &Path) -> Result<DiscoveryRecord> {
    let path = discovery_path(project_root);
    let record: DiscoveryRecord = crate::storage::read_json(&path)
        .with_context(|| format!("No discovery record at {}", path.display()))?;

    if record.port == 0 {
        anyhow::bail!("Discovery record at {} has port 0", path.display());
    }
    Ok(record)
}

/// Walk upward from `start` until a directory containing `Library/` is
/// found. Returns `None` at the filesystem root.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut dir = if start.is_absolute() {
        start.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(start)
    };

    loop {
        if dir.join(DISCOVERY_DIR).is_dir() {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Check whether the process with the given pid is still running.
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // Signal 0 doesn't deliver anything, just probes for existence
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
        use windows_sys::Win32::System::Threading::{
            GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        };

        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle == 0 {
                return false;
            }
            let mut code: u32 = 0;
            let ok = GetExitCodeProcess(handle, &mut code);
            CloseHandle(handle);
            ok != 0 && code == STILL_ACTIVE as u32
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        true
    }
}

/// Read the record and reject it when the recorded process is dead.
pub fn read_live_record(project_root: &Path) -> Result<DiscoveryRecord> {
    let record = read_record(project_root)?;
    if !is_process_running(record.pid) {
        anyhow::bail!(
            "Discovery record is stale: host pid {} is not running",
            record.pid
        );
    }
    Ok(record)
}
