//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AgentBuilder**: Agent の構築とワイヤリング
//! - **Agent**: poll loop（ログ転送 + モデル inventory）
//! - **PointBatcher**: レコードから point への変換
//! - **discovery**: manifests ディレクトリの探索

pub mod batcher;
pub mod builder;
pub mod discovery;
pub mod poll_loop;

// 主要な型を再エクスポート
pub use self::batcher::{LogBatch, PointBatcher};
pub use self::builder::{AgentBuilder, AgentSettings, BuildError};
pub use self::poll_loop::{Agent, InventoryOutcome, LogCycleOutcome};
