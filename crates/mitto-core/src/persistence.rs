// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::error::CoreResult;

/// Read-modify-write discipline for the small per-session JSON files
/// (`metadata.json`, `queue.json`, `periodic.json`, `lock.json`,
/// `user-data.json`): write to a temp file in the same directory, then
/// rename over the target so readers never observe a partial write.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_name = format!(".{}.tmp-{}", file_name(path), Uuid::new_v4());
    let tmp_path = dir.join(tmp_name);
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read and deserialize a JSON file, returning `Ok(None)` if absent (the
/// convention used by `lock.json`/`periodic.json`: absence means "free" or
/// "no periodic configured").
pub fn read_json_optional<T: DeserializeOwned>(path: &Path) -> CoreResult<Option<T>> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&text)?))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string())
}

pub fn remove_if_exists(path: &Path) -> CoreResult<()> {
    if path.is_file() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        n: u32,
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        write_json_atomic(&path, &Sample { n: 7 }).unwrap();
        let read: Option<Sample> = read_json_optional(&path).unwrap();
        assert_eq!(read, Some(Sample { n: 7 }));
    }

    #[test]
    fn read_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let read: Option<Sample> = read_json_optional(&path).unwrap();
        assert_eq!(read, None);
    }

    #[test]
    fn remove_if_exists_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock.json");
        assert!(remove_if_exists(&path).is_ok());
        write_json_atomic(&path, &Sample { n: 1 }).unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.is_file());
    }
}
