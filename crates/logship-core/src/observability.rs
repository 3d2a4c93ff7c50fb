//! Observability - tracing の初期化
//!
//! stdout とログファイルの両方に出力する。ファイルは追記モードで開き、ANSI 色は付けない。
//! レベルは `RUST_LOG` で上書きでき、既定は `info`。
//!
//! 起動を止めるような致命的イベントは `error!(severity = "critical", ...)` で出す。

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info";

/// LogInitError はログ出力の準備に失敗したこと
#[derive(Debug, thiserror::Error)]
pub enum LogInitError {
    #[error("could not open log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("a global subscriber is already installed: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// グローバル subscriber を登録する。プロセスで 1 回だけ呼ぶ
pub fn init(log_file: &Path) -> Result<(), LogInitError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|source| LogInitError::Open {
            path: log_file.to_path_buf(),
            source,
        })?;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_level(true))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file)),
        )
        .try_init()?;

    tracing::info!(log_file = %log_file.display(), "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopenable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("logship.log");

        match init(&path) {
            Err(LogInitError::Open { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected Open error, got {other:?}"),
        }
    }
}
