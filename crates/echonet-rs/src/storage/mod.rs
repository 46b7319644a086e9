// crates/echonet-rs/src/storage/mod.rs
//! Crash-safe JSON persistence shared by every store, plus the small
//! user-facing stores (aliases, groups, locations).

pub mod alias;
pub mod group;
pub mod location;

pub use alias::AliasStore;
pub use group::GroupStore;
pub use location::LocationSettings;

use crate::error::EchonetError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Writes `value` as JSON to `path` atomically: the content lands in
/// `path.tmp` first and is renamed over `path`. A failed rename removes the
/// temporary file so no half-written state survives.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), EchonetError> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = tmp_path(path);
    std::fs::write(&tmp, json)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Loads JSON from `path`. A missing file yields `None` so stores can start
/// empty; any other failure is a persistence error.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, EchonetError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
}

/// Reads the raw text of `path`, `None` when absent.
pub fn load_text(path: &Path) -> Result<Option<String>, EchonetError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut os_string = path.as_os_str().to_os_string();
    os_string.push(".tmp");
    os_string.into()
}
