//! Impls - ports の実装
//!
//! # 本番用
//! - **JournalctlSource**: `journalctl` を spawn
//! - **FsManifestScanner**: manifest ディレクトリを走査
//! - **InfluxSink**: InfluxDB v2 HTTP API
//! - **FileCheckpointStore**: checkpoint を JSON ファイルに保存
//!
//! # 開発用・テスト用
//! - **memory**: StaticJournal, StaticScanner, RecordingSink, MemoryCheckpointStore

pub mod journalctl;
pub mod manifest_dir;
pub mod influx;
pub mod file_checkpoint;
pub mod memory;

// 主要な型を再エクスポート
pub use self::journalctl::JournalctlSource;
pub use self::manifest_dir::FsManifestScanner;
pub use self::influx::{InfluxSettings, InfluxSink};
pub use self::file_checkpoint::FileCheckpointStore;
pub use self::memory::{
    MemoryCheckpointStore, RecordingSink, SinkCall, StaticJournal, StaticScanner,
};
