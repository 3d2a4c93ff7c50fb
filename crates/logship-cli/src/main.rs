//! logship - Ollama の journal とモデル inventory を InfluxDB に送る agent
//!
//! # フロー
//! 1. 設定を読み込む（ファイル + 環境変数 + CLI）
//! 2. ログ出力を初期化
//! 3. InfluxDB に接続（`/health`）
//! 4. Agent を組み立てて実行（シグナルで停止、`--once` なら 1 cycle）

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use logship_core::app::AgentBuilder;
use logship_core::config::{self, AgentConfig, ConfigFile, DEFAULT_LOG_FILE, Overrides};
use logship_core::impls::{FileCheckpointStore, InfluxSink, JournalctlSource};
use logship_core::observability;
use logship_core::ports::{PointSink, SystemClock};

/// Ships Ollama journal logs and the on-disk model inventory to InfluxDB.
#[derive(Parser, Debug)]
#[command(name = "logship", version, about)]
struct Cli {
    /// Path to config file (TOML). If omitted, `logship.toml` is loaded when present.
    #[arg(long, env = "LOGSHIP_CONFIG")]
    config: Option<PathBuf>,

    /// Do not load any config file; use defaults + env + CLI only.
    #[arg(long, default_value_t = false)]
    no_config: bool,

    /// Load and validate config (file + env + CLI), print the effective settings, then exit.
    #[arg(long, default_value_t = false)]
    validate_config: bool,

    /// systemd unit to follow (default: ollama.service).
    #[arg(long)]
    unit: Option<String>,

    /// Host tag attached to every point (default: kernel hostname).
    #[arg(long)]
    host: Option<String>,

    /// Log file, appended to alongside stdout (default: logship.log).
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Refresh the inventory, ship one batch of logs, then exit.
    #[arg(long, default_value_t = false)]
    once: bool,
}

impl Cli {
    fn config_file(&self) -> ConfigFile {
        match (&self.config, self.no_config) {
            (_, true) => ConfigFile::Disabled,
            (Some(path), false) => ConfigFile::Path(path.clone()),
            (None, false) => ConfigFile::Default,
        }
    }

    fn overrides(&self) -> Overrides {
        Overrides {
            unit: self.unit.clone(),
            host: self.host.clone(),
            log_file: self.log_file.clone(),
        }
    }
}

/// SIGINT (Ctrl+C) か SIGTERM で完了する
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(error) => {
                warn!(%error, "could not listen for SIGTERM");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

fn print_effective(config: &AgentConfig) {
    println!("influxdb_url={}", config.influx.url);
    println!("influxdb_org={}", config.influx.org);
    println!("influxdb_bucket={}", config.influx.bucket);
    println!("host={}", config.host);
    println!("unit={}", config.unit);
    println!("poll_interval_secs={}", config.poll_interval.as_secs());
    println!("inventory_every={}", config.inventory_every);
    println!("history_window_hours={}", config.history_window.num_hours());
    match &config.models_path {
        Some(path) => println!("models_path={}", path.display()),
        None => println!("models_path=<discover from journal>"),
    }
    println!("checkpoint_path={}", config.checkpoint_path.display());
    println!("log_file={}", config.log_file.display());
}

async fn run(cli: &Cli, config: AgentConfig) -> ExitCode {
    let sink = match InfluxSink::connect(config.influx.clone()).await {
        Ok(sink) => Arc::new(sink),
        Err(error) => {
            error!(severity = "critical", url = %config.influx.url, %error, "failed to connect to InfluxDB");
            return ExitCode::FAILURE;
        }
    };

    let journal = JournalctlSource::new(SystemClock)
        .with_program(config.journalctl.clone())
        .with_sudo(config.use_sudo)
        .with_history_window(config.history_window);

    let built = AgentBuilder::new(config.agent_settings())
        .journal(Arc::new(journal))
        .sink(sink.clone())
        .checkpoint_store(Arc::new(FileCheckpointStore::new(
            config.checkpoint_path.clone(),
        )))
        .build();
    let mut agent = match built {
        Ok(agent) => agent,
        Err(error) => {
            error!(severity = "critical", %error, "invalid agent settings");
            if let Err(error) = sink.close().await {
                warn!(%error, "failed to close sink");
            }
            return ExitCode::FAILURE;
        }
    };

    if cli.once {
        agent.run_once().await;
        return ExitCode::SUCCESS;
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    agent.run(shutdown_rx).await;
    info!("agent stopped");
    ExitCode::SUCCESS
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let loaded = config::load(&cli.config_file(), &cli.overrides());

    let log_file = match &loaded {
        Ok(config) => config.log_file.clone(),
        Err(_) => cli
            .log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
    };
    if let Err(error) = observability::init(&log_file) {
        eprintln!("logship: {error}");
        return ExitCode::FAILURE;
    }

    let config = match loaded {
        Ok(config) => config,
        Err(error) => {
            error!(severity = "critical", %error, "configuration error");
            return ExitCode::FAILURE;
        }
    };

    if cli.validate_config {
        print_effective(&config);
        info!("configuration is valid");
        return ExitCode::SUCCESS;
    }

    run(&cli, config).await
}
