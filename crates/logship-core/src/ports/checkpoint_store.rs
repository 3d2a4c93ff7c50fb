//! CheckpointStore port - checkpoint の永続化
//!
//! CheckpointTracker（メモリ）が正本で、ここは write-through の写し。
//! 再起動時に load して Uninitialized の代わりに使う。

use chrono::{DateTime, Utc};

/// CheckpointStoreError は永続化の失敗
#[derive(Debug, thiserror::Error)]
pub enum CheckpointStoreError {
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint file is corrupt: {0}")]
    Corrupt(String),
}

pub trait CheckpointStore: Send + Sync {
    fn load(&self) -> Result<Option<DateTime<Utc>>, CheckpointStoreError>;

    fn save(&self, instant: DateTime<Utc>) -> Result<(), CheckpointStoreError>;
}
