//! PointBatcher - レコード / item を measurement point に変換
//!
//! 純粋な変換だけを行う（I/O なし）。host と source tag はここで一括して付ける。

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::{
    InventoryItem, InventoryPoint, LogPoint, LogRecord, decode_instant, dedup_hash,
};

/// journal 由来であることを示す source tag の既定値
pub const DEFAULT_SOURCE: &str = "systemd";

/// 1 cycle 分の log point と、その中の最大 instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBatch {
    pub points: Vec<LogPoint>,
    /// checkpoint の候補
    pub max_instant: Option<DateTime<Utc>>,
    /// timestamp が範囲外で捨てたレコード数
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct PointBatcher {
    host: String,
    source: String,
}

impl PointBatcher {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            source: DEFAULT_SOURCE.to_string(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn to_log_points(&self, records: &[LogRecord]) -> LogBatch {
        let mut batch = LogBatch::default();
        for record in records {
            let timestamp = match decode_instant(record.raw_timestamp_micros) {
                Ok(timestamp) => timestamp,
                Err(error) => {
                    warn!(%error, "skipping journal record");
                    batch.skipped += 1;
                    continue;
                }
            };

            batch.points.push(LogPoint {
                source: self.source.clone(),
                host: self.host.clone(),
                dedup_hash: dedup_hash(record.raw_timestamp_micros, &record.message),
                message: record.message.clone(),
                timestamp,
            });

            if batch.max_instant.is_none_or(|max| timestamp > max) {
                batch.max_instant = Some(timestamp);
            }
        }
        batch
    }

    /// 全 point に同じ `now` を付ける（inventory は時系列ではなくスナップショット）
    pub fn to_inventory_points(
        &self,
        items: &[InventoryItem],
        source_path: &Path,
        now: DateTime<Utc>,
    ) -> Vec<InventoryPoint> {
        let source_path = source_path.display().to_string();
        items
            .iter()
            .map(|item| InventoryPoint {
                host: self.host.clone(),
                model_name: item.model_name.clone(),
                content_digest: item.content_digest.clone(),
                size_bytes: item.size_bytes,
                source_path: source_path.clone(),
                timestamp: now,
            })
            .collect()
    }
}
