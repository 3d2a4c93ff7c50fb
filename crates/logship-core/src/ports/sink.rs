//! PointSink port - 時系列 DB（InfluxDB v2 など）
//!
//! コアが sink に求めるのは write と delete の 2 つだけ。
//! どちらも同じ point の再送に対して冪等であることを前提にする。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::Point;

/// SinkError は sink 操作の失敗
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink transport failed: {0}")]
    Transport(String),

    #[error("sink rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("sink is closed")]
    Closed,
}

/// PointSink は bucket / organization を内部に持った接続
///
/// 起動時に 1 回だけ作り、プロセス終了時に必ず `close` する。
#[async_trait]
pub trait PointSink: Send + Sync {
    async fn write(&self, points: &[Point]) -> Result<(), SinkError>;

    /// `[start, stop]` の範囲で predicate に一致する point を削除
    async fn delete(
        &self,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        predicate: &str,
    ) -> Result<(), SinkError>;

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
