//! JournalSource port - system journal の抽象化
//!
//! 本番は `journalctl` を spawn する実装（impls::journalctl）、
//! テストは固定レコードを返す実装（impls::memory::StaticJournal）を使う。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::LogRecord;

/// 初回（checkpoint なし）に遡る時間
pub const DEFAULT_HISTORY_WINDOW_HOURS: i64 = 24;

/// JournalError は journal 取得の失敗
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("journal output is not UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// JournalSource は unit のログを時刻指定で取り出す
///
/// # 契約
/// - `since == None`: 過去 window（既定 24 時間）だけを取得
/// - `since == Some(t)`: `t + 1us` 以降を取得（下限が inclusive なので重複を避ける）
/// - 壊れた行はスキップしてログに残す。取得そのものの失敗は `Err`
#[async_trait]
pub trait JournalSource: Send + Sync {
    async fn fetch_since(
        &self,
        unit: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogRecord>, JournalError>;

    /// unit の直近 `count` 行（整形済みテキスト）を古い順に返す
    async fn recent_lines(&self, unit: &str, count: usize) -> Result<Vec<String>, JournalError>;
}

/// journal に渡す inclusive な下限を計算
pub fn query_lower_bound(
    since: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    history_window: Duration,
) -> DateTime<Utc> {
    match since {
        Some(since) => since + Duration::microseconds(1),
        None => now - history_window,
    }
}
