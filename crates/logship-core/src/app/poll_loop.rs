//! Agent - poll loop 本体
//!
//! # フロー（primary cycle, 既定 10 秒ごと）
//! 1. CheckpointTracker から下限を取得
//! 2. JournalSource::fetch_since() でレコード取得
//! 3. PointBatcher で LogPoint に変換（最大 instant も計算）
//! 4. PointSink::write() で書き込み
//! 5. 成功したら checkpoint を最大 instant へ（0 件なら fetch 開始時刻へ）
//!
//! # フロー（secondary cycle, 起動時 + 既定 360 cycle ごと）
//! 1. manifests path を解決（未解決なら journal から探す）
//! 2. ManifestScanner::scan()
//! 3. この host の inventory を delete してから write
//!
//! どの cycle の失敗もログに残して次の cycle へ進む。プロセスは落とさない。

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::app::batcher::PointBatcher;
use crate::app::builder::AgentSettings;
use crate::app::discovery::{DISCOVERY_LINES, find_manifests_path, manifests_dir};
use crate::domain::{CheckpointTracker, INVENTORY_MEASUREMENT, Point, decode_instant};
use crate::ports::{CheckpointStore, Clock, JournalSource, ManifestScanner, PointSink};

/// primary cycle の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCycleOutcome {
    /// `count` 件を書き込み、checkpoint が `checkpoint` になった
    Shipped {
        count: usize,
        checkpoint: Option<DateTime<Utc>>,
    },
    /// 新しいレコードが無く、checkpoint を fetch 開始時刻へ進めた
    Idle { checkpoint: Option<DateTime<Utc>> },
    /// journal の取得に失敗（checkpoint は動かさない）
    FetchFailed,
    /// sink への書き込みに失敗（checkpoint は動かさない、次 cycle で再取得）
    WriteFailed,
}

/// secondary cycle の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryOutcome {
    Refreshed { count: usize },
    /// ディスク上にモデルが無く、この host の inventory は空になった
    Emptied,
    /// manifests path が未解決のためスキップ
    PathUnknown,
    WriteFailed,
}

/// Agent は 1 つの unit と 1 つの host を担当する実行コンテキスト
///
/// グローバル状態は持たない。テストでは複数の Agent を独立に作れる。
pub struct Agent {
    pub(crate) settings: AgentSettings,
    pub(crate) journal: Arc<dyn JournalSource>,
    pub(crate) scanner: Arc<dyn ManifestScanner>,
    pub(crate) sink: Arc<dyn PointSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) checkpoint_store: Arc<dyn CheckpointStore>,
    pub(crate) tracker: CheckpointTracker,
    pub(crate) batcher: PointBatcher,
    pub(crate) manifests_path: Option<PathBuf>,
}

impl Agent {
    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// 次の poll の下限
    pub fn checkpoint(&self) -> Option<DateTime<Utc>> {
        self.tracker.boundary_for_next_poll()
    }

    pub fn manifests_path(&self) -> Option<&PathBuf> {
        self.manifests_path.as_ref()
    }

    /// tracker を進め、進んだら store に書き写す
    fn advance_checkpoint(&mut self, candidate: Option<DateTime<Utc>>) {
        if !self.tracker.advance(candidate) {
            return;
        }
        if let Some(instant) = self.tracker.boundary_for_next_poll()
            && let Err(error) = self.checkpoint_store.save(instant)
        {
            warn!(%error, checkpoint = %instant, "could not persist checkpoint");
        }
    }

    /// primary cycle を 1 回実行
    pub async fn poll_logs(&mut self) -> LogCycleOutcome {
        let since = self.tracker.boundary_for_next_poll();
        match since {
            Some(since) => debug!(%since, "requesting new logs"),
            None => info!("first run, requesting logs from the history window"),
        }

        // fetch 中に届いたレコードを飛ばさないよう、時刻は fetch の前に読む
        let started_at = self.clock.now();
        let records = match self.journal.fetch_since(&self.settings.unit, since).await {
            Ok(records) => records,
            Err(error) => {
                error!(unit = %self.settings.unit, %error, "journal fetch failed");
                return LogCycleOutcome::FetchFailed;
            }
        };

        let batch = self.batcher.to_log_points(&records);
        if batch.skipped > 0 {
            warn!(
                skipped = batch.skipped,
                "dropped journal records with unrepresentable timestamps"
            );
        }
        if batch.points.is_empty() {
            // 空の window を何度も読み直さないよう fetch 開始時刻まで進める
            self.advance_checkpoint(Some(started_at));
            let checkpoint = self.checkpoint();
            debug!(records = records.len(), checkpoint = ?checkpoint, "no new logs");
            return LogCycleOutcome::Idle { checkpoint };
        }

        let count = batch.points.len();
        let points: Vec<Point> = batch.points.into_iter().map(Point::from).collect();
        info!(count, "writing new log entries");

        if let Err(error) = self.sink.write(&points).await {
            error!(count, %error, "failed to write log batch");
            return LogCycleOutcome::WriteFailed;
        }

        self.advance_checkpoint(batch.max_instant);
        let checkpoint = self.checkpoint();
        info!(count, checkpoint = ?checkpoint, "log batch shipped");
        LogCycleOutcome::Shipped { count, checkpoint }
    }

    /// manifests path を解決する。明示指定 > 解決済み > journal から探索
    async fn resolve_manifests_path(&mut self) -> Option<PathBuf> {
        if let Some(path) = &self.manifests_path {
            return Some(path.clone());
        }
        if let Some(models) = &self.settings.models_path {
            let path = manifests_dir(models);
            info!(path = %path.display(), "using configured models path");
            self.manifests_path = Some(path.clone());
            return Some(path);
        }

        info!(unit = %self.settings.unit, "looking for OLLAMA_MODELS in recent journal output");
        let lines = match self
            .journal
            .recent_lines(&self.settings.unit, DISCOVERY_LINES)
            .await
        {
            Ok(lines) => lines,
            Err(error) => {
                error!(unit = %self.settings.unit, %error, "could not read journal for discovery");
                return None;
            }
        };

        match find_manifests_path(&lines) {
            Some(path) => {
                info!(path = %path.display(), "found manifests path");
                self.manifests_path = Some(path.clone());
                Some(path)
            }
            None => {
                warn!("could not find OLLAMA_MODELS path in recent journal output");
                None
            }
        }
    }

    /// この host の inventory を削除する predicate
    fn inventory_predicate(&self) -> String {
        format!(
            r#"_measurement="{}" AND host="{}""#,
            INVENTORY_MEASUREMENT,
            self.batcher.host().replace('\\', "\\\\").replace('"', "\\\"")
        )
    }

    /// secondary cycle を 1 回実行
    pub async fn refresh_inventory(&mut self) -> InventoryOutcome {
        info!("starting model inventory update");
        let Some(root) = self.resolve_manifests_path().await else {
            warn!("skipping model inventory update: manifests path not set");
            return InventoryOutcome::PathUnknown;
        };

        let items = self.scanner.scan(&root);
        let now = self.clock.now();

        let predicate = self.inventory_predicate();
        let epoch = decode_instant(0).unwrap_or(DateTime::<Utc>::MIN_UTC);
        match self.sink.delete(epoch, now, &predicate).await {
            Ok(()) => info!(host = %self.batcher.host(), "deleted previous inventory"),
            Err(error) => {
                error!(%error, "failed to delete previous inventory, new data will still be written")
            }
        }

        if items.is_empty() {
            info!("no models found on disk, inventory for this host is now empty");
            return InventoryOutcome::Emptied;
        }

        let points: Vec<Point> = self
            .batcher
            .to_inventory_points(&items, &root, now)
            .into_iter()
            .map(Point::from)
            .collect();
        let count = points.len();

        match self.sink.write(&points).await {
            Ok(()) => {
                info!(count, "model inventory updated");
                InventoryOutcome::Refreshed { count }
            }
            Err(error) => {
                error!(count, %error, "failed to write model inventory");
                InventoryOutcome::WriteFailed
            }
        }
    }

    /// 起動時 inventory → primary cycle を 1 回 → close
    pub async fn run_once(&mut self) {
        self.refresh_inventory().await;
        self.poll_logs().await;
        self.close().await;
    }

    /// shutdown を受け取るまで cycle を繰り返し、最後に sink を close する
    ///
    /// shutdown は cycle 間の sleep 中にだけ反映される（実行中の fetch / write は中断しない）。
    /// sender が drop された場合も停止する。
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            unit = %self.settings.unit,
            host = %self.settings.host,
            interval = ?self.settings.poll_interval,
            "starting log monitoring"
        );
        self.refresh_inventory().await;

        let mut cycles_since_inventory: u32 = 0;
        loop {
            self.poll_logs().await;

            cycles_since_inventory += 1;
            if cycles_since_inventory >= self.settings.inventory_every {
                info!("periodic model inventory update triggered");
                self.refresh_inventory().await;
                cycles_since_inventory = 0;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = shutdown.recv() => {
                    info!("monitoring stopped by signal");
                    break;
                }
            }
        }

        self.close().await;
    }

    pub async fn close(&self) {
        if let Err(error) = self.sink.close().await {
            warn!(%error, "failed to close sink");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::builder::AgentBuilder;
    use crate::domain::{InventoryItem, LogRecord};
    use crate::impls::{
        FsManifestScanner, MemoryCheckpointStore, RecordingSink, SinkCall, StaticJournal,
        StaticScanner,
    };
    use crate::ports::{FixedClock, JournalError};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    /// fetch の間に時計が進む journal（journalctl の実行時間の代わり）
    struct SlowJournal {
        clock: Arc<FixedClock>,
        elapsed: Duration,
    }

    #[async_trait]
    impl JournalSource for SlowJournal {
        async fn fetch_since(
            &self,
            _unit: &str,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Vec<LogRecord>, JournalError> {
            self.clock.advance(self.elapsed);
            Ok(Vec::new())
        }

        async fn recent_lines(&self, _unit: &str, _count: usize) -> Result<Vec<String>, JournalError> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        journal: Arc<StaticJournal>,
        sink: Arc<RecordingSink>,
        clock: Arc<FixedClock>,
        store: Arc<MemoryCheckpointStore>,
        scanner: Arc<StaticScanner>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                journal: Arc::new(StaticJournal::new()),
                sink: Arc::new(RecordingSink::new()),
                clock: Arc::new(FixedClock::new(
                    decode_instant(1_700_000_000_000_000).unwrap(),
                )),
                store: Arc::new(MemoryCheckpointStore::new()),
                scanner: Arc::new(StaticScanner::new(vec![])),
            }
        }

        fn settings(&self) -> AgentSettings {
            let mut settings = AgentSettings::new("gpu-1");
            settings.models_path = Some(PathBuf::from("/srv/models"));
            settings
        }

        fn agent(&self) -> Agent {
            self.agent_with(self.settings())
        }

        fn agent_with(&self, settings: AgentSettings) -> Agent {
            AgentBuilder::new(settings)
                .journal(self.journal.clone())
                .sink(self.sink.clone())
                .clock(self.clock.clone())
                .checkpoint_store(self.store.clone())
                .scanner(self.scanner.clone())
                .build()
                .unwrap()
        }
    }

    fn item(name: &str) -> InventoryItem {
        InventoryItem {
            model_name: name.to_string(),
            content_digest: "a".repeat(64),
            size_bytes: Some(1),
        }
    }

    #[tokio::test]
    async fn shipped_batch_advances_to_latest_record() {
        let fx = Fixture::new();
        fx.journal.push_records(vec![
            LogRecord::new(1_000_000, "a"),
            LogRecord::new(2_000_000, "b"),
        ]);
        let mut agent = fx.agent();

        let outcome = agent.poll_logs().await;

        let t2 = decode_instant(2_000_000).unwrap();
        assert_eq!(
            outcome,
            LogCycleOutcome::Shipped {
                count: 2,
                checkpoint: Some(t2)
            }
        );
        assert_eq!(fx.sink.written_points().len(), 2);
        assert_eq!(fx.store.saved(), Some(t2));
    }

    #[tokio::test]
    async fn next_poll_uses_previous_checkpoint() {
        let fx = Fixture::new();
        fx.journal.push_records(vec![LogRecord::new(2_000_000, "b")]);
        let mut agent = fx.agent();

        agent.poll_logs().await;
        agent.poll_logs().await;

        assert_eq!(
            fx.journal.seen_since(),
            vec![None, Some(decode_instant(2_000_000).unwrap())]
        );
    }

    #[tokio::test]
    async fn empty_cycle_moves_checkpoint_to_now() {
        let fx = Fixture::new();
        let mut agent = fx.agent();
        let before = fx.clock.now();

        let outcome = agent.poll_logs().await;

        assert_eq!(outcome, LogCycleOutcome::Idle { checkpoint: Some(before) });
        assert!(agent.checkpoint().unwrap() >= before);
        assert!(fx.sink.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_cycle_with_system_clock_lands_near_now() {
        let fx = Fixture::new();
        let mut agent = AgentBuilder::new(fx.settings())
            .journal(fx.journal.clone())
            .sink(fx.sink.clone())
            .build()
            .unwrap();

        let before = Utc::now();
        agent.poll_logs().await;
        let after = Utc::now();

        let checkpoint = agent.checkpoint().unwrap();
        assert!(checkpoint >= before && checkpoint <= after);
        assert!(after - checkpoint < Duration::seconds(1));
    }

    #[tokio::test]
    async fn write_failure_keeps_checkpoint_for_retry() {
        let fx = Fixture::new();
        fx.journal
            .push_records(vec![LogRecord::new(2_000_000, "b")])
            .push_records(vec![LogRecord::new(2_000_000, "b")]);
        fx.sink.fail_next_writes(1);
        let mut agent = fx.agent();

        assert_eq!(agent.poll_logs().await, LogCycleOutcome::WriteFailed);
        assert_eq!(agent.checkpoint(), None);

        let outcome = agent.poll_logs().await;
        assert!(matches!(outcome, LogCycleOutcome::Shipped { count: 1, .. }));
        assert_eq!(fx.journal.seen_since(), vec![None, None]);
    }

    #[tokio::test]
    async fn fetch_failure_does_not_move_checkpoint() {
        let fx = Fixture::new();
        fx.journal.push_failure("journal unavailable");
        let mut agent = fx.agent();

        assert_eq!(agent.poll_logs().await, LogCycleOutcome::FetchFailed);
        assert_eq!(agent.checkpoint(), None);
        assert_eq!(fx.store.saved(), None);
    }

    #[tokio::test]
    async fn stale_batch_never_regresses_checkpoint() {
        let fx = Fixture::new();
        fx.journal.push_records(vec![LogRecord::new(1_000_000, "old")]);
        let t1 = decode_instant(5_000_000).unwrap();
        let fx_store = Arc::new(MemoryCheckpointStore::with_saved(t1));
        let mut agent = AgentBuilder::new(fx.settings())
            .journal(fx.journal.clone())
            .sink(fx.sink.clone())
            .checkpoint_store(fx_store)
            .build()
            .unwrap();

        agent.poll_logs().await;
        assert_eq!(agent.checkpoint(), Some(t1));
    }

    #[tokio::test]
    async fn inventory_refresh_deletes_then_writes_for_host() {
        let fx = Fixture::new();
        fx.scanner.set_items(vec![item("repoA:tag1"), item("repoB:tag2")]);
        let mut agent = fx.agent();

        let outcome = agent.refresh_inventory().await;

        assert_eq!(outcome, InventoryOutcome::Refreshed { count: 2 });
        let calls = fx.sink.calls();
        assert_eq!(calls.len(), 2);
        match &calls[0] {
            SinkCall::Delete { predicate, stop, .. } => {
                assert_eq!(predicate, r#"_measurement="model_inventory" AND host="gpu-1""#);
                assert_eq!(*stop, fx.clock.now());
            }
            other => panic!("expected delete first, got {other:?}"),
        }
        match &calls[1] {
            SinkCall::Write(points) => {
                assert_eq!(points.len(), 2);
                assert!(points.iter().all(|p| p.measurement == INVENTORY_MEASUREMENT));
                assert!(points.iter().all(|p| p.tag_value("host") == Some("gpu-1")));
            }
            other => panic!("expected write second, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn inventory_refresh_from_real_tree() {
        let dir = tempfile::tempdir().unwrap();
        let manifests = dir.path().join("manifests");
        for rel in ["repoA/tag1/m", "repoB/tag2/m"] {
            let path = manifests.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(
                &path,
                format!(
                    r#"{{"layers":[{{"mediaType":"application/vnd.ollama.image.model","digest":"sha256:{}","size":3}}]}}"#,
                    "c".repeat(64)
                ),
            )
            .unwrap();
        }

        let fx = Fixture::new();
        let mut settings = fx.settings();
        settings.models_path = Some(dir.path().to_path_buf());
        let mut agent = AgentBuilder::new(settings)
            .journal(fx.journal.clone())
            .sink(fx.sink.clone())
            .scanner(Arc::new(FsManifestScanner::new()))
            .build()
            .unwrap();

        assert_eq!(agent.refresh_inventory().await, InventoryOutcome::Refreshed { count: 2 });
        let names: Vec<_> = fx
            .sink
            .written_points()
            .iter()
            .filter_map(|p| p.tag_value("model_name").map(str::to_string))
            .collect();
        assert_eq!(names, vec!["repoA:tag1", "repoB:tag2"]);
    }

    #[tokio::test]
    async fn delete_failure_still_writes() {
        let fx = Fixture::new();
        fx.scanner.set_items(vec![item("repoA:tag1")]);
        fx.sink.fail_next_deletes(1);
        let mut agent = fx.agent();

        assert_eq!(agent.refresh_inventory().await, InventoryOutcome::Refreshed { count: 1 });
        assert!(matches!(fx.sink.calls().as_slice(), [SinkCall::Write(_)]));
    }

    #[tokio::test]
    async fn no_models_leaves_inventory_empty() {
        let fx = Fixture::new();
        let mut agent = fx.agent();

        assert_eq!(agent.refresh_inventory().await, InventoryOutcome::Emptied);
        assert!(matches!(fx.sink.calls().as_slice(), [SinkCall::Delete { .. }]));
    }

    #[tokio::test]
    async fn discovery_retries_until_path_appears() {
        let fx = Fixture::new();
        fx.scanner.set_items(vec![item("repoA:tag1")]);
        let mut settings = fx.settings();
        settings.models_path = None;
        let mut agent = fx.agent_with(settings);

        assert_eq!(agent.refresh_inventory().await, InventoryOutcome::PathUnknown);
        assert!(fx.sink.calls().is_empty());

        fx.journal.set_recent_lines(vec![
            "ollama[7]: server config env=\"map[OLLAMA_MODELS:/data/models]\"".to_string(),
        ]);
        assert_eq!(agent.refresh_inventory().await, InventoryOutcome::Refreshed { count: 1 });
        assert_eq!(
            agent.manifests_path(),
            Some(&PathBuf::from("/data/models/manifests"))
        );
    }

    #[tokio::test]
    async fn run_does_startup_inventory_then_polls_until_shutdown() {
        let fx = Fixture::new();
        fx.scanner.set_items(vec![item("repoA:tag1")]);
        fx.journal.push_records(vec![LogRecord::new(1_000_000, "a")]);
        let mut settings = fx.settings();
        settings.poll_interval = StdDuration::from_secs(3600);
        let mut agent = fx.agent_with(settings);

        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();
        agent.run(rx).await;

        let calls = fx.sink.calls();
        assert!(matches!(calls[0], SinkCall::Delete { .. }));
        assert!(matches!(&calls[1], SinkCall::Write(p) if p[0].measurement == INVENTORY_MEASUREMENT));
        assert!(matches!(&calls[2], SinkCall::Write(p) if p[0].measurement == "logs"));
        assert_eq!(calls.last(), Some(&SinkCall::Close));
        assert_eq!(fx.journal.seen_since().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_refreshes_inventory_on_cadence() {
        let fx = Fixture::new();
        fx.scanner.set_items(vec![item("repoA:tag1")]);
        let mut settings = fx.settings();
        settings.inventory_every = 2;
        let mut agent = fx.agent_with(settings);

        let (tx, rx) = broadcast::channel(1);
        let stopper = tokio::spawn(async move {
            // 10s 間隔で 3 cycle 分進める
            tokio::time::sleep(StdDuration::from_secs(25)).await;
            let _ = tx.send(());
        });
        agent.run(rx).await;
        stopper.await.unwrap();

        let deletes = fx
            .sink
            .calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Delete { .. }))
            .count();
        // 起動時 + 2 cycle 目
        assert_eq!(deletes, 2);
        assert_eq!(fx.journal.seen_since().len(), 3);
    }

    #[tokio::test]
    async fn run_once_closes_sink() {
        let fx = Fixture::new();
        let mut agent = fx.agent();
        agent.run_once().await;
        assert_eq!(fx.sink.calls().last(), Some(&SinkCall::Close));
    }

    #[tokio::test]
    async fn idle_checkpoint_is_taken_before_the_fetch() {
        let fx = Fixture::new();
        let started = fx.clock.now();
        let journal = Arc::new(SlowJournal {
            clock: fx.clock.clone(),
            elapsed: Duration::seconds(5),
        });
        let mut agent = AgentBuilder::new(fx.settings())
            .journal(journal)
            .sink(fx.sink.clone())
            .clock(fx.clock.clone())
            .build()
            .unwrap();

        let outcome = agent.poll_logs().await;

        assert_eq!(outcome, LogCycleOutcome::Idle { checkpoint: Some(started) });
        assert!(fx.clock.now() > started);
    }

    #[tokio::test]
    async fn unrepresentable_timestamps_are_dropped_from_the_batch() {
        let fx = Fixture::new();
        fx.journal.push_records(vec![
            LogRecord::new(u64::MAX, "far future"),
            LogRecord::new(1_000_000, "a"),
        ]);
        let mut agent = fx.agent();

        let outcome = agent.poll_logs().await;

        assert_eq!(
            outcome,
            LogCycleOutcome::Shipped {
                count: 1,
                checkpoint: Some(decode_instant(1_000_000).unwrap())
            }
        );
        assert_eq!(fx.sink.written_points().len(), 1);
    }

    #[tokio::test]
    async fn agents_are_isolated() {
        let a = Fixture::new();
        let b = Fixture::new();
        a.journal.push_records(vec![LogRecord::new(1_000_000, "a")]);
        let mut agent_a = a.agent();
        let mut agent_b = b.agent();

        agent_a.poll_logs().await;
        agent_b.poll_logs().await;

        assert_eq!(agent_a.checkpoint(), Some(decode_instant(1_000_000).unwrap()));
        assert_eq!(agent_b.checkpoint(), Some(b.clock.now()));
    }

    #[test]
    fn predicate_escapes_quotes_in_host() {
        let fx = Fixture::new();
        let agent = fx.agent_with(AgentSettings::new(r#"odd"host"#));
        assert_eq!(
            agent.inventory_predicate(),
            r#"_measurement="model_inventory" AND host="odd\"host""#
        );
    }
}
