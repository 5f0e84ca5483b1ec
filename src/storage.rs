use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Per-user hostlink directory (`~/.hostlink`).
///
/// Holds logs and the optional config file. Can be relocated with
/// `$HOSTLINK_HOME` (used by the test suite for isolation).
pub fn hostlink_dir() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("HOSTLINK_HOME") {
        return Ok(PathBuf::from(path));
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("No home directory"))?;
    Ok(home.join(".hostlink"))
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Write a value as pretty-printed JSON, atomically (tmp file + rename).
pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp_path, json.as_bytes())?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)?;
    let value = serde_json::from_str(&data)
        .map_err(|e| anyhow::anyhow!("Corrupt JSON at {}: {}", path.display(), e))?;
    Ok(value)
}
