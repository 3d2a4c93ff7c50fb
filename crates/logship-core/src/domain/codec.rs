//! Codec - タイムスタンプ変換と dedup hash
//!
//! journal の `__REALTIME_TIMESTAMP` はエポックからのマイクロ秒（整数）です。
//! ここでは浮動小数点を一切使わずに `DateTime<Utc>` へ変換します。
//!
//! # 学習ポイント
//! - `div_euclid` / `rem_euclid` ではなく u64 の `/` と `%` で十分（負にならない）
//! - chrono の `from_timestamp` は範囲外で `None` を返すので Result に変換する

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

const MICROS_PER_SEC: u64 = 1_000_000;
const NANOS_PER_MICRO: u32 = 1_000;

/// CodecError はタイムスタンプ変換の失敗
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("timestamp {0}us is outside the representable range")]
    OutOfRange(u64),
}

/// マイクロ秒エポックを UTC の instant に変換
///
/// 秒とマイクロ秒に整数で分解してから組み立てるので、丸め誤差は発生しません。
pub fn decode_instant(raw_micros: u64) -> Result<DateTime<Utc>, CodecError> {
    let secs = raw_micros / MICROS_PER_SEC;
    let micros = (raw_micros % MICROS_PER_SEC) as u32;
    let secs = i64::try_from(secs).map_err(|_| CodecError::OutOfRange(raw_micros))?;

    DateTime::from_timestamp(secs, micros * NANOS_PER_MICRO)
        .ok_or(CodecError::OutOfRange(raw_micros))
}

/// instant をマイクロ秒エポックに戻す（checkpoint 永続化用）
///
/// エポック以前の instant は `None`。
pub fn encode_instant(instant: DateTime<Utc>) -> Option<u64> {
    u64::try_from(instant.timestamp_micros()).ok()
}

/// ログレコードの dedup key
///
/// `"{raw_micros}:{message}"` の SHA-256（小文字 hex）。sink 側で identity として
/// 使われるので、書式は変えてはいけない。
pub fn dedup_hash(raw_micros: u64, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_micros.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(message.as_bytes());
    format!("{:x}", hasher.finalize())
}
