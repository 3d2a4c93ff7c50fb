//! InfluxSink - InfluxDB v2 HTTP API を使う PointSink
//!
//! # エンドポイント
//! - `GET  /health`                              : 起動時の接続確認
//! - `POST /api/v2/write?org&bucket&precision=us` : line protocol で書き込み
//! - `POST /api/v2/delete?org&bucket`             : predicate で削除

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::Point;
use crate::ports::{PointSink, SinkError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// InfluxDB への接続情報
#[derive(Debug, Clone)]
pub struct InfluxSettings {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

/// InfluxSink は起動時に 1 回だけ `connect` し、終了時に `close` する
pub struct InfluxSink {
    client: Client,
    settings: InfluxSettings,
    closed: AtomicBool,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    start: String,
    stop: String,
    predicate: &'a str,
}

impl InfluxSink {
    /// HTTP client を作り、`/health` で疎通を確認する
    ///
    /// 失敗は起動時の致命的エラーとして扱われる。
    pub async fn connect(settings: InfluxSettings) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SinkError::Transport(format!("http client build failed: {e}")))?;

        let sink = Self {
            client,
            settings,
            closed: AtomicBool::new(false),
        };

        let response = sink
            .client
            .get(sink.url("/health"))
            .send()
            .await
            .map_err(|e| SinkError::Transport(format!("health check failed: {e}")))?;
        check_status(response).await?;

        info!(url = %sink.settings.url, org = %sink.settings.org, bucket = %sink.settings.bucket, "connected to InfluxDB");
        Ok(sink)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(
            reqwest::header::AUTHORIZATION,
            format!("Token {}", self.settings.token),
        )
    }

    fn ensure_open(&self) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        Ok(())
    }
}

/// 2xx 以外を SinkError::Rejected にする
async fn check_status(response: Response) -> Result<(), SinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(SinkError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// points を改行区切りの line protocol にする
pub fn encode_batch(points: &[Point]) -> String {
    points
        .iter()
        .map(Point::to_line_protocol)
        .collect::<Vec<_>>()
        .join("\n")
}

fn rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[async_trait]
impl PointSink for InfluxSink {
    async fn write(&self, points: &[Point]) -> Result<(), SinkError> {
        self.ensure_open()?;
        if points.is_empty() {
            return Ok(());
        }
        debug!(count = points.len(), "writing points");

        let request = self
            .client
            .post(self.url("/api/v2/write"))
            .query(&[
                ("org", self.settings.org.as_str()),
                ("bucket", self.settings.bucket.as_str()),
                ("precision", "us"),
            ])
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(encode_batch(points));

        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| SinkError::Transport(format!("write failed: {e}")))?;
        check_status(response).await
    }

    async fn delete(
        &self,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        predicate: &str,
    ) -> Result<(), SinkError> {
        self.ensure_open()?;
        debug!(%predicate, "deleting points");

        let request = self
            .client
            .post(self.url("/api/v2/delete"))
            .query(&[
                ("org", self.settings.org.as_str()),
                ("bucket", self.settings.bucket.as_str()),
            ])
            .json(&DeleteRequest {
                start: rfc3339(start),
                stop: rfc3339(stop),
                predicate,
            });

        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| SinkError::Transport(format!("delete failed: {e}")))?;
        check_status(response).await
    }

    async fn close(&self) -> Result<(), SinkError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("InfluxDB connection closed");
        }
        Ok(())
    }
}
