//! logship-core
//!
//! systemd journal のログと、ディスク上のモデル inventory を時系列 DB に送る agent の部品。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（codec, record, point, checkpoint）
//! - **ports**: 抽象化レイヤー（JournalSource, ManifestScanner, PointSink, CheckpointStore, Clock）
//! - **impls**: 実装（journalctl, manifest ディレクトリ, InfluxDB, ファイル, in-memory）
//! - **app**: アプリケーションロジック（builder, poll loop, batcher, discovery）
//! - **config**: ファイル + 環境変数 + CLI の設定
//! - **observability**: tracing の初期化

pub mod domain;
pub mod ports;
pub mod impls;
pub mod app;
pub mod config;
pub mod observability;
