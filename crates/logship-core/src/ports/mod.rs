//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（systemd journal, ファイルシステム, InfluxDB）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - コア（app）は ports だけに依存する
//! - テストは impls::memory の実装で差し替える

pub mod clock;
pub mod journal_source;
pub mod manifest_scanner;
pub mod sink;
pub mod checkpoint_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::journal_source::{
    DEFAULT_HISTORY_WINDOW_HOURS, JournalError, JournalSource, query_lower_bound,
};
pub use self::manifest_scanner::ManifestScanner;
pub use self::sink::{PointSink, SinkError};
pub use self::checkpoint_store::{CheckpointStore, CheckpointStoreError};
