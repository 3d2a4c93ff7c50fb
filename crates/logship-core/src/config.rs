//! Config - ファイル + 環境変数 + CLI の重ね合わせ
//!
//! # 優先順位（上が強い）
//! 1. CLI（`Overrides`）
//! 2. 環境変数（`INFLUXDB_*`, `LOGSHIP_*`）
//! 3. TOML ファイル（`--config`、無ければ `logship.toml` があれば）
//! 4. 既定値
//!
//! # 学習ポイント
//! - ファイル層の構造体は全フィールド `Option`（部分的な設定を許す）
//! - 必須キーの欠落はまとめて 1 つのエラーにする（1 個ずつ直させない）
//! - テストでは `Environment::source` でプロセスの環境変数を使わずに注入する

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, Map};
use serde::Deserialize;

use crate::app::builder::{
    AgentSettings, DEFAULT_INVENTORY_EVERY, DEFAULT_POLL_INTERVAL, DEFAULT_UNIT,
};
use crate::impls::InfluxSettings;
use crate::ports::DEFAULT_HISTORY_WINDOW_HOURS;

/// `--config` が無いときに探すファイル
pub const DEFAULT_CONFIG_FILE: &str = "logship.toml";
pub const DEFAULT_CHECKPOINT_FILE: &str = "logship-checkpoint.json";
pub const DEFAULT_LOG_FILE: &str = "logship.log";
const DEFAULT_JOURNALCTL: &str = "journalctl";
const FALLBACK_HOSTNAME: &str = "localhost";

/// ConfigError は起動を止める設定の問題
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("could not read configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("missing required settings: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// どのファイルを読むか
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigFile {
    /// `logship.toml` がカレントにあれば読む
    #[default]
    Default,
    /// 指定されたファイル（存在しなければエラー）
    Path(PathBuf),
    /// ファイルは読まない（既定値 + 環境変数 + CLI）
    Disabled,
}

/// CLI から来る上書き
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub unit: Option<String>,
    pub host: Option<String>,
    pub log_file: Option<PathBuf>,
}

/// ファイル / 環境変数の生の値
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    influxdb_url: Option<String>,
    influxdb_token: Option<String>,
    influxdb_org: Option<String>,
    influxdb_bucket: Option<String>,
    host: Option<String>,
    unit: Option<String>,
    poll_interval_secs: Option<u64>,
    inventory_every: Option<u32>,
    history_window_hours: Option<u32>,
    models_path: Option<PathBuf>,
    checkpoint_path: Option<PathBuf>,
    journalctl: Option<String>,
    use_sudo: Option<bool>,
    log_file: Option<PathBuf>,
}

/// AgentConfig は解決済みの設定
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub influx: InfluxSettings,
    pub host: String,
    pub unit: String,
    pub poll_interval: Duration,
    pub inventory_every: u32,
    pub history_window: chrono::Duration,
    pub models_path: Option<PathBuf>,
    pub checkpoint_path: PathBuf,
    pub journalctl: String,
    pub use_sudo: bool,
    pub log_file: PathBuf,
}

impl AgentConfig {
    /// Agent 用の設定を取り出す
    pub fn agent_settings(&self) -> AgentSettings {
        let mut settings = AgentSettings::new(self.host.clone());
        settings.unit = self.unit.clone();
        settings.poll_interval = self.poll_interval;
        settings.inventory_every = self.inventory_every;
        settings.models_path = self.models_path.clone();
        settings
    }
}

/// プロセスの環境変数を使って読み込む
pub fn load(file: &ConfigFile, overrides: &Overrides) -> Result<AgentConfig, ConfigError> {
    load_with_env(file, overrides, None)
}

/// `env` が `Some` ならプロセスの環境変数の代わりに使う
pub fn load_with_env(
    file: &ConfigFile,
    overrides: &Overrides,
    env: Option<Map<String, String>>,
) -> Result<AgentConfig, ConfigError> {
    let mut builder = Config::builder();

    match file {
        ConfigFile::Path(path) => {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.clone()));
            }
            builder = builder.add_source(File::from(path.as_path()).required(true));
        }
        ConfigFile::Default => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path).required(false));
            }
        }
        ConfigFile::Disabled => {}
    }

    // INFLUXDB_URL -> influxdb_url（prefix ごとキーにする）
    builder = builder
        .add_source(
            Environment::with_prefix("INFLUXDB")
                .keep_prefix(true)
                .ignore_empty(true)
                .source(env.clone()),
        )
        .add_source(
            Environment::with_prefix("LOGSHIP")
                .try_parsing(true)
                .ignore_empty(true)
                .source(env),
        );

    let partial: FileConfig = builder.build()?.try_deserialize()?;
    resolve(partial, overrides)
}

fn resolve(partial: FileConfig, overrides: &Overrides) -> Result<AgentConfig, ConfigError> {
    let mut missing = Vec::new();
    let mut require = |value: Option<String>, key: &'static str| match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => {
            missing.push(key);
            String::new()
        }
    };
    let influx = InfluxSettings {
        url: require(partial.influxdb_url, "INFLUXDB_URL"),
        token: require(partial.influxdb_token, "INFLUXDB_TOKEN"),
        org: require(partial.influxdb_org, "INFLUXDB_ORG"),
        bucket: require(partial.influxdb_bucket, "INFLUXDB_BUCKET"),
    };
    if !missing.is_empty() {
        return Err(ConfigError::Missing(missing));
    }

    let poll_interval_secs = partial
        .poll_interval_secs
        .unwrap_or(DEFAULT_POLL_INTERVAL.as_secs());
    if poll_interval_secs == 0 {
        return Err(ConfigError::Invalid {
            name: "poll_interval_secs",
            reason: "must be greater than zero".into(),
        });
    }

    let inventory_every = partial.inventory_every.unwrap_or(DEFAULT_INVENTORY_EVERY);
    if inventory_every == 0 {
        return Err(ConfigError::Invalid {
            name: "inventory_every",
            reason: "must be at least 1".into(),
        });
    }

    let history_window_hours = partial
        .history_window_hours
        .map(i64::from)
        .unwrap_or(DEFAULT_HISTORY_WINDOW_HOURS);
    if history_window_hours == 0 {
        return Err(ConfigError::Invalid {
            name: "history_window_hours",
            reason: "must be at least 1".into(),
        });
    }

    let host = overrides
        .host
        .clone()
        .or(partial.host)
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(detect_hostname);

    Ok(AgentConfig {
        influx,
        host,
        unit: overrides
            .unit
            .clone()
            .or(partial.unit)
            .unwrap_or_else(|| DEFAULT_UNIT.to_string()),
        poll_interval: Duration::from_secs(poll_interval_secs),
        inventory_every,
        history_window: chrono::Duration::hours(history_window_hours),
        models_path: partial.models_path,
        checkpoint_path: partial
            .checkpoint_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_FILE)),
        journalctl: partial
            .journalctl
            .unwrap_or_else(|| DEFAULT_JOURNALCTL.to_string()),
        use_sudo: partial.use_sudo.unwrap_or(false),
        log_file: overrides
            .log_file
            .clone()
            .or(partial.log_file)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
    })
}

/// カーネルの hostname。読めなければ `/etc/hostname`、それも無ければ "localhost"
pub fn detect_hostname() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok())
        .map(|raw| raw.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_HOSTNAME.to_string())
}
