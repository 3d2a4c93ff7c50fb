//! Domain model (records, points, checkpoint, codec).
//!
//! ここには I/O を持たない純粋な型と関数だけを置く。
//! - codec: マイクロ秒 → instant 変換、dedup hash
//! - record: journal レコード / inventory item
//! - point: sink に書く measurement point
//! - checkpoint: 送信済み位置の状態機械

pub mod codec;
pub mod record;
pub mod point;
pub mod checkpoint;

pub use self::codec::{CodecError, decode_instant, dedup_hash, encode_instant};
pub use self::record::{InventoryItem, LogRecord, RecordError, parse_journal_line};
pub use self::point::{
    FieldValue, INVENTORY_MEASUREMENT, InventoryPoint, LOG_MEASUREMENT, LogPoint, Point,
};
pub use self::checkpoint::{Checkpoint, CheckpointTracker};
