//! Record - journal から取り出したログ 1 件と、ディスク上のモデル 1 件
//!
//! # 学習ポイント
//! - `serde_json::Value` で「形が揺れる」フィールドを受ける
//! - MESSAGE が無いレコードも捨てない（レコード全体を message にする）
//! - serde_json の `Formatter` で出力の書式を差し替える

use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Serializer, Value};

/// journal の realtime timestamp フィールド名
pub const REALTIME_TIMESTAMP_FIELD: &str = "__REALTIME_TIMESTAMP";

/// journal の message フィールド名
pub const MESSAGE_FIELD: &str = "MESSAGE";

/// LogRecord は 1 回の poll cycle の間だけ存在する生のログ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub raw_timestamp_micros: u64,
    pub message: String,
    /// message がレコード全体のシリアライズで代用されたか
    pub message_fallback: bool,
}

impl LogRecord {
    pub fn new(raw_timestamp_micros: u64, message: impl Into<String>) -> Self {
        Self {
            raw_timestamp_micros,
            message: message.into(),
            message_fallback: false,
        }
    }
}

/// RecordError は journal の 1 行を LogRecord にできなかった理由
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("line is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("line is not a JSON object")]
    NotAnObject,

    #[error("missing or non-numeric __REALTIME_TIMESTAMP")]
    MissingTimestamp,
}

/// `journalctl --output=json` の 1 行を LogRecord に変換
///
/// journal は数値を文字列で出力するが、数値そのものも受け付ける。
/// MESSAGE は文字列・バイト配列（非 UTF-8 のとき）・欠落のいずれもあり得る。
pub fn parse_journal_line(line: &str) -> Result<LogRecord, RecordError> {
    let entry: Value = serde_json::from_str(line)?;
    let object = entry.as_object().ok_or(RecordError::NotAnObject)?;

    let raw_timestamp_micros = match object.get(REALTIME_TIMESTAMP_FIELD) {
        Some(Value::String(s)) => s.parse::<u64>().map_err(|_| RecordError::MissingTimestamp)?,
        Some(Value::Number(n)) => n.as_u64().ok_or(RecordError::MissingTimestamp)?,
        _ => return Err(RecordError::MissingTimestamp),
    };

    let message = match object.get(MESSAGE_FIELD) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(bytes)) => {
            let bytes: Option<Vec<u8>> = bytes
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect();
            bytes.map(|b| String::from_utf8_lossy(&b).into_owned())
        }
        _ => None,
    };

    Ok(match message {
        Some(message) if !message.is_empty() => LogRecord::new(raw_timestamp_micros, message),
        _ => LogRecord {
            raw_timestamp_micros,
            message: to_fallback_json(&entry),
            message_fallback: true,
        },
    })
}

/// Python の `json.dumps` 既定と同じ書式
///
/// 区切りは `", "` / `": "`、非 ASCII は `\uXXXX`（小文字 hex, サロゲートペア）。
/// キー順は journal の出力順のまま（serde_json の `preserve_order`）。
struct DumpsFormatter;

impl Formatter for DumpsFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        for c in fragment.chars() {
            if c.is_ascii() {
                writer.write_all(&[c as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

/// MESSAGE の代わりに使うレコード全体の文字列
///
/// dedup hash の入力になるので、書式は常に同じでなければならない。
fn to_fallback_json(entry: &Value) -> String {
    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, DumpsFormatter);
    if entry.serialize(&mut serializer).is_err() {
        return entry.to_string();
    }
    String::from_utf8(out).unwrap_or_else(|_| entry.to_string())
}

/// InventoryItem はディスク上のモデル 1 件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    pub model_name: String,
    /// sha256 の hex（64 文字）
    pub content_digest: String,
    pub size_bytes: Option<u64>,
}
