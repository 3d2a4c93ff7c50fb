//! AgentBuilder - Agent の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 永続化された checkpoint の復元は build() で 1 回だけ行う

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::batcher::{DEFAULT_SOURCE, PointBatcher};
use crate::app::poll_loop::Agent;
use crate::domain::CheckpointTracker;
use crate::impls::{FsManifestScanner, MemoryCheckpointStore};
use crate::ports::{CheckpointStore, Clock, JournalSource, ManifestScanner, PointSink, SystemClock};

/// 監視する unit の既定値
pub const DEFAULT_UNIT: &str = "ollama.service";
/// primary cycle の間隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// 何 primary cycle ごとに inventory を更新するか（10s * 360 = 1h）
pub const DEFAULT_INVENTORY_EVERY: u32 = 360;

/// AgentSettings は Agent の振る舞いを決める値
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub unit: String,
    pub host: String,
    pub source: String,
    pub poll_interval: Duration,
    pub inventory_every: u32,
    /// OLLAMA_MODELS の明示指定。None なら journal から探す
    pub models_path: Option<PathBuf>,
}

impl AgentSettings {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            unit: DEFAULT_UNIT.to_string(),
            host: host.into(),
            source: DEFAULT_SOURCE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            inventory_every: DEFAULT_INVENTORY_EVERY,
            models_path: None,
        }
    }
}

/// BuildError は Agent 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing component: {0}")]
    MissingComponent(&'static str),

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// AgentBuilder は ports を受け取り Agent を組み立てる
///
/// # 使用例
/// ```ignore
/// let agent = AgentBuilder::new(settings)
///     .journal(Arc::new(JournalctlSource::new(SystemClock)))
///     .sink(Arc::new(InfluxSink::connect(influx).await?))
///     .checkpoint_store(Arc::new(FileCheckpointStore::new("checkpoint.json")))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - journal と sink は必須
/// - scanner / clock / checkpoint_store は省略時に既定実装を使う
pub struct AgentBuilder {
    settings: AgentSettings,
    journal: Option<Arc<dyn JournalSource>>,
    scanner: Option<Arc<dyn ManifestScanner>>,
    sink: Option<Arc<dyn PointSink>>,
    clock: Option<Arc<dyn Clock>>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
}

impl AgentBuilder {
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            settings,
            journal: None,
            scanner: None,
            sink: None,
            clock: None,
            checkpoint_store: None,
        }
    }

    pub fn journal(mut self, journal: Arc<dyn JournalSource>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn scanner(mut self, scanner: Arc<dyn ManifestScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn PointSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    fn validate(settings: &AgentSettings) -> Result<(), BuildError> {
        if settings.host.trim().is_empty() {
            return Err(BuildError::InvalidSetting {
                name: "host",
                reason: "must not be empty".into(),
            });
        }
        if settings.unit.trim().is_empty() {
            return Err(BuildError::InvalidSetting {
                name: "unit",
                reason: "must not be empty".into(),
            });
        }
        if settings.poll_interval.is_zero() {
            return Err(BuildError::InvalidSetting {
                name: "poll_interval",
                reason: "must be greater than zero".into(),
            });
        }
        if settings.inventory_every == 0 {
            return Err(BuildError::InvalidSetting {
                name: "inventory_every",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// 検証して Agent を生成。checkpoint はここで復元する
    pub fn build(self) -> Result<Agent, BuildError> {
        Self::validate(&self.settings)?;
        let journal = self.journal.ok_or(BuildError::MissingComponent("journal"))?;
        let sink = self.sink.ok_or(BuildError::MissingComponent("sink"))?;
        let scanner = self
            .scanner
            .unwrap_or_else(|| Arc::new(FsManifestScanner::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let checkpoint_store = self
            .checkpoint_store
            .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new()));

        let tracker = match checkpoint_store.load() {
            Ok(Some(instant)) => {
                info!(checkpoint = %instant, "resuming from persisted checkpoint");
                CheckpointTracker::restored(instant)
            }
            Ok(None) => CheckpointTracker::new(),
            Err(error) => {
                warn!(%error, "could not load persisted checkpoint, starting fresh");
                CheckpointTracker::new()
            }
        };

        let batcher = PointBatcher::new(self.settings.host.clone())
            .with_source(self.settings.source.clone());

        Ok(Agent {
            settings: self.settings,
            journal,
            scanner,
            sink,
            clock,
            checkpoint_store,
            tracker,
            batcher,
            manifests_path: None,
        })
    }
}
