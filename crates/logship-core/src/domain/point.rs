//! Point - 時系列 DB に書き込む measurement point
//!
//! # 二層構造
//! - **表層（Typed）**: `LogPoint`, `InventoryPoint` - measurement ごとの型
//! - **内部（Generic）**: `Point` - sink が扱う汎用表現（line protocol へ変換）
//!
//! tags は dedup の identity、fields は payload。

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

/// ログの measurement 名
pub const LOG_MEASUREMENT: &str = "logs";

/// モデル inventory の measurement 名
pub const INVENTORY_MEASUREMENT: &str = "model_inventory";

/// field の値
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Str(String),
    UInt(u64),
}

/// Point は measurement + tags + fields + timestamp
///
/// BTreeMap なので tag の並びは常にソート済み（line protocol 推奨順）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// InfluxDB line protocol（precision = us）の 1 行にする
    ///
    /// ```text
    /// measurement,tag1=v1,tag2=v2 field1="s",field2=42u 1700000000123456
    /// ```
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            if value.is_empty() {
                // 空の tag 値は line protocol で表現できない
                continue;
            }
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }

        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    FieldValue::Str(s) => format!("\"{}\"", escape_string(s)),
                    FieldValue::UInt(n) => format!("{n}u"),
                };
                format!("{}={}", escape(key, &[',', '=', ' ']), value)
            })
            .collect();

        let _ = write!(
            line,
            " {} {}",
            fields.join(","),
            self.timestamp.timestamp_micros()
        );
        line
    }
}

/// measurement / tag / field key 用。指定文字の前に backslash を置く
///
/// 改行は tag の中に置けないので `\n` / `\r` の 2 文字にする。
fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => {
                if special.contains(&c) {
                    out.push('\\');
                }
                out.push(c);
            }
        }
    }
    out
}

/// string field 用。`"` と `\` だけを escape する
///
/// 改行はそのまま残す（quoted string の中なら line protocol の行区切りにならない）。
fn escape_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    for c in raw.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// LogPoint は journal レコード 1 件分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPoint {
    pub source: String,
    pub host: String,
    pub dedup_hash: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<LogPoint> for Point {
    fn from(p: LogPoint) -> Self {
        Point::new(LOG_MEASUREMENT, p.timestamp)
            .tag("source", p.source)
            .tag("host", p.host)
            .tag("dedup_hash", p.dedup_hash)
            .field("message", FieldValue::Str(p.message))
    }
}

/// InventoryPoint はモデル 1 件分のスナップショット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryPoint {
    pub host: String,
    pub model_name: String,
    pub content_digest: String,
    pub size_bytes: Option<u64>,
    pub source_path: String,
    pub timestamp: DateTime<Utc>,
}

impl From<InventoryPoint> for Point {
    fn from(p: InventoryPoint) -> Self {
        let mut point = Point::new(INVENTORY_MEASUREMENT, p.timestamp)
            .tag("host", p.host)
            .tag("model_name", p.model_name)
            .field("content_digest", FieldValue::Str(p.content_digest))
            .field("source_path", FieldValue::Str(p.source_path));
        if let Some(size) = p.size_bytes {
            point = point.field("size_bytes", FieldValue::UInt(size));
        }
        point
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codec::decode_instant;

    #[test]
    fn log_point_line_protocol() {
        let point: Point = LogPoint {
            source: "systemd".into(),
            host: "gpu-1".into(),
            dedup_hash: "abc".into(),
            message: "hello world".into(),
            timestamp: decode_instant(1_700_000_000_123_456).unwrap(),
        }
        .into();

        assert_eq!(
            point.to_line_protocol(),
            r#"logs,dedup_hash=abc,host=gpu-1,source=systemd message="hello world" 1700000000123456"#
        );
    }

    #[test]
    fn inventory_point_omits_absent_size() {
        let point: Point = InventoryPoint {
            host: "gpu-1".into(),
            model_name: "llama3:latest".into(),
            content_digest: "ff".into(),
            size_bytes: None,
            source_path: "/m".into(),
            timestamp: decode_instant(1_000_000).unwrap(),
        }
        .into();

        assert!(!point.fields.contains_key("size_bytes"));
        assert_eq!(
            point.to_line_protocol(),
            r#"model_inventory,host=gpu-1,model_name=llama3:latest content_digest="ff",source_path="/m" 1000000"#
        );
    }

    #[test]
    fn escapes_special_characters() {
        let point = Point::new("m s", decode_instant(1).unwrap())
            .tag("host", "a,b=c d")
            .field("message", FieldValue::Str("say \"hi\" C:\\".into()))
            .field("size_bytes", FieldValue::UInt(42));

        assert_eq!(
            point.to_line_protocol(),
            r#"m\ s,host=a\,b\=c\ d message="say \"hi\" C:\\",size_bytes=42u 1"#
        );
    }

    #[test]
    fn multi_line_messages_keep_raw_newlines() {
        let point = Point::new(LOG_MEASUREMENT, decode_instant(1).unwrap())
            .field("message", FieldValue::Str("panic: boom\ngoroutine 1\r\n".into()));

        assert_eq!(
            point.to_line_protocol(),
            "logs message=\"panic: boom\ngoroutine 1\r\n\" 1"
        );
    }

    #[test]
    fn newlines_in_tags_never_split_the_line() {
        let point = Point::new("m", decode_instant(1).unwrap())
            .tag("host", "a\nb")
            .field("f", FieldValue::UInt(1));
        assert_eq!(point.to_line_protocol(), r"m,host=a\nb f=1u 1");
    }

    #[test]
    fn empty_tag_values_are_dropped() {
        let point = Point::new("m", decode_instant(1).unwrap())
            .tag("host", "")
            .field("f", FieldValue::UInt(1));
        assert_eq!(point.to_line_protocol(), "m f=1u 1");
    }
}
