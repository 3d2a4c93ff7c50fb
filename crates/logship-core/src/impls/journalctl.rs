//! JournalctlSource - `journalctl` を spawn する JournalSource
//!
//! # 学習ポイント
//! - tokio::process で外部コマンドを async に実行
//! - `--since=@<secs>.<micros>` でタイムゾーンに依存しない下限を渡す
//! - 1 行ごとの parse 失敗は warn してスキップ（兄弟行は止めない）

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{LogRecord, parse_journal_line};
use crate::ports::{
    Clock, DEFAULT_HISTORY_WINDOW_HOURS, JournalError, JournalSource, query_lower_bound,
};

const DEFAULT_PROGRAM: &str = "journalctl";

/// JournalctlSource は journalctl の JSON 出力を LogRecord にする
pub struct JournalctlSource<C> {
    program: String,
    use_sudo: bool,
    history_window: Duration,
    clock: C,
}

impl<C: Clock> JournalctlSource<C> {
    pub fn new(clock: C) -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            use_sudo: false,
            history_window: Duration::hours(DEFAULT_HISTORY_WINDOW_HOURS),
            clock,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// `sudo journalctl ...` として実行する
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    pub fn with_history_window(mut self, window: Duration) -> Self {
        self.history_window = window;
        self
    }

    /// 実際に exec される (program, args)
    fn invocation(&self, args: Vec<String>) -> (String, Vec<String>) {
        if self.use_sudo {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(self.program.clone());
            full.extend(args);
            ("sudo".to_string(), full)
        } else {
            (self.program.clone(), args)
        }
    }

    fn fetch_args(&self, unit: &str, since: Option<DateTime<Utc>>) -> Vec<String> {
        let bound = query_lower_bound(since, self.clock.now(), self.history_window);
        vec![
            format!("--unit={unit}"),
            format!("--since={}", format_since(bound)),
            "--output=json".to_string(),
            "--no-pager".to_string(),
        ]
    }

    async fn run(&self, args: Vec<String>) -> Result<String, JournalError> {
        let (program, args) = self.invocation(args);
        debug!(%program, ?args, "running journal query");

        let output = Command::new(&program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| JournalError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(JournalError::CommandFailed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8(output.stdout)?)
    }
}

/// `@<secs>.<micros>` 形式（systemd.time の epoch 表記）
pub fn format_since(bound: DateTime<Utc>) -> String {
    format!("@{}.{:06}", bound.timestamp(), bound.timestamp_subsec_micros())
}

/// journalctl の JSON 出力全体を LogRecord 列にする
pub fn parse_journal_output(stdout: &str) -> Vec<LogRecord> {
    let mut records = Vec::new();
    for (index, line) in stdout.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_journal_line(line) {
            Ok(record) => {
                if record.message_fallback {
                    warn!(
                        raw_timestamp_micros = record.raw_timestamp_micros,
                        "MESSAGE not found, using full journal entry as message"
                    );
                }
                records.push(record);
            }
            Err(error) => {
                warn!(line_no = index + 1, %error, line = %truncate(line, 200), "could not process journal line");
            }
        }
    }
    records
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl<C: Clock> JournalSource for JournalctlSource<C> {
    async fn fetch_since(
        &self,
        unit: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogRecord>, JournalError> {
        let stdout = self.run(self.fetch_args(unit, since)).await?;
        Ok(parse_journal_output(&stdout))
    }

    async fn recent_lines(&self, unit: &str, count: usize) -> Result<Vec<String>, JournalError> {
        let args = vec![
            format!("--unit={unit}"),
            "-n".to_string(),
            count.to_string(),
            "--no-pager".to_string(),
        ];
        let stdout = self.run(args).await?;
        Ok(stdout.lines().map(str::to_string).collect())
    }
}
