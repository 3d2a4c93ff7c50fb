//! In-memory ports - 開発用・テスト用の実装
//!
//! # 含まれる実装
//! - **StaticJournal**: 事前に積んだレコードを返す JournalSource
//! - **RecordingSink**: 呼び出しを記録する PointSink
//! - **MemoryCheckpointStore**: プロセス内だけの CheckpointStore

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{InventoryItem, LogRecord, Point};
use crate::ports::{
    CheckpointStore, CheckpointStoreError, JournalError, JournalSource, ManifestScanner,
    PointSink, SinkError,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// fetch 1 回分の応答
#[derive(Debug)]
pub enum FetchReply {
    Records(Vec<LogRecord>),
    Fail(String),
}

/// StaticJournal は積まれた応答を 1 回の fetch ごとに 1 つ返す
///
/// 応答が尽きたら空の結果を返す。受け取った `since` は記録される。
#[derive(Debug, Default)]
pub struct StaticJournal {
    replies: Mutex<VecDeque<FetchReply>>,
    recent: Mutex<Vec<String>>,
    seen_since: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl StaticJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_records(&self, records: Vec<LogRecord>) -> &Self {
        lock(&self.replies).push_back(FetchReply::Records(records));
        self
    }

    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        lock(&self.replies).push_back(FetchReply::Fail(message.into()));
        self
    }

    pub fn set_recent_lines(&self, lines: Vec<String>) {
        *lock(&self.recent) = lines;
    }

    /// fetch_since に渡された `since` の履歴
    pub fn seen_since(&self) -> Vec<Option<DateTime<Utc>>> {
        lock(&self.seen_since).clone()
    }
}

#[async_trait]
impl JournalSource for StaticJournal {
    async fn fetch_since(
        &self,
        _unit: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogRecord>, JournalError> {
        lock(&self.seen_since).push(since);
        match lock(&self.replies).pop_front() {
            Some(FetchReply::Records(records)) => Ok(records),
            Some(FetchReply::Fail(stderr)) => Err(JournalError::CommandFailed {
                program: "static-journal".to_string(),
                status: "exit status: 1".to_string(),
                stderr,
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn recent_lines(&self, _unit: &str, count: usize) -> Result<Vec<String>, JournalError> {
        let lines = lock(&self.recent);
        let skip = lines.len().saturating_sub(count);
        Ok(lines[skip..].to_vec())
    }
}

/// StaticScanner は root に関係なく同じ item を返す
#[derive(Debug, Default)]
pub struct StaticScanner {
    items: Mutex<Vec<InventoryItem>>,
}

impl StaticScanner {
    pub fn new(items: Vec<InventoryItem>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    pub fn set_items(&self, items: Vec<InventoryItem>) {
        *lock(&self.items) = items;
    }
}

impl ManifestScanner for StaticScanner {
    fn scan(&self, _root: &std::path::Path) -> Vec<InventoryItem> {
        lock(&self.items).clone()
    }
}

/// RecordingSink に届いた呼び出し
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Write(Vec<Point>),
    Delete {
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        predicate: String,
    },
    Close,
}

/// RecordingSink は呼び出しを順番どおりに記録する
///
/// `fail_next_writes` / `fail_next_deletes` で失敗を注入できる。
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    failing_writes: Mutex<usize>,
    failing_deletes: Mutex<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_writes(&self, n: usize) {
        *lock(&self.failing_writes) = n;
    }

    pub fn fail_next_deletes(&self, n: usize) {
        *lock(&self.failing_deletes) = n;
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        lock(&self.calls).clone()
    }

    /// 成功した write の point をすべて連結
    pub fn written_points(&self) -> Vec<Point> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                SinkCall::Write(points) => Some(points.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn take_failure(counter: &Mutex<usize>) -> bool {
        let mut n = lock(counter);
        if *n > 0 {
            *n -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl PointSink for RecordingSink {
    async fn write(&self, points: &[Point]) -> Result<(), SinkError> {
        if Self::take_failure(&self.failing_writes) {
            return Err(SinkError::Transport("injected write failure".to_string()));
        }
        lock(&self.calls).push(SinkCall::Write(points.to_vec()));
        Ok(())
    }

    async fn delete(
        &self,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        predicate: &str,
    ) -> Result<(), SinkError> {
        if Self::take_failure(&self.failing_deletes) {
            return Err(SinkError::Transport("injected delete failure".to_string()));
        }
        lock(&self.calls).push(SinkCall::Delete {
            start,
            stop,
            predicate: predicate.to_string(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        lock(&self.calls).push(SinkCall::Close);
        Ok(())
    }
}

/// MemoryCheckpointStore はプロセス内にだけ checkpoint を持つ
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    saved: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_saved(instant: DateTime<Utc>) -> Self {
        Self {
            saved: Mutex::new(Some(instant)),
        }
    }

    pub fn saved(&self) -> Option<DateTime<Utc>> {
        *lock(&self.saved)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Option<DateTime<Utc>>, CheckpointStoreError> {
        Ok(self.saved())
    }

    fn save(&self, instant: DateTime<Utc>) -> Result<(), CheckpointStoreError> {
        *lock(&self.saved) = Some(instant);
        Ok(())
    }
}
