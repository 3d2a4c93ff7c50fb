//! FileCheckpointStore - checkpoint を小さな JSON ファイルに保存
//!
//! temp ファイルに書いてから rename するので、途中でクラッシュしても
//! 前回の内容か新しい内容のどちらかが残る。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{decode_instant, encode_instant};
use crate::ports::{CheckpointStore, CheckpointStoreError};

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    last_shipped_micros: u64,
}

#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<DateTime<Utc>>, CheckpointStoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: CheckpointFile = serde_json::from_slice(&bytes)
            .map_err(|e| CheckpointStoreError::Corrupt(e.to_string()))?;
        decode_instant(file.last_shipped_micros)
            .map(Some)
            .map_err(|e| CheckpointStoreError::Corrupt(e.to_string()))
    }

    fn save(&self, instant: DateTime<Utc>) -> Result<(), CheckpointStoreError> {
        let last_shipped_micros = encode_instant(instant).ok_or_else(|| {
            CheckpointStoreError::Corrupt(format!("instant {instant} is before the epoch"))
        })?;
        let body = serde_json::to_vec(&CheckpointFile { last_shipped_micros })
            .map_err(|e| CheckpointStoreError::Corrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn save_then_load_keeps_microseconds() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("state/checkpoint.json"));
        let t = decode_instant(1_700_000_000_123_457).unwrap();

        store.save(t).unwrap();
        assert_eq!(store.load().unwrap(), Some(t));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(&path, "garbage").unwrap();
        let store = FileCheckpointStore::new(path);
        assert!(matches!(store.load(), Err(CheckpointStoreError::Corrupt(_))));
    }
}
