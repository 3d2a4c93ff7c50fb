//! Discovery - manifests ディレクトリの場所を journal から探す
//!
//! ollama は起動時に設定を 1 行で出力する。その中の `OLLAMA_MODELS:<path>` を拾い、
//! `<path>/manifests` を inventory の root にする。

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

/// journal から読む直近の行数
pub const DISCOVERY_LINES: usize = 200;

static MODELS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"OLLAMA_MODELS:([^\s\]]+)").expect("OLLAMA_MODELS pattern is valid")
});

/// 新しい行から順に探し、最初に見つかった models path の manifests を返す
pub fn find_manifests_path<S: AsRef<str>>(lines: &[S]) -> Option<PathBuf> {
    lines.iter().rev().find_map(|line| {
        MODELS_RE
            .captures(line.as_ref())
            .and_then(|caps| caps.get(1))
            .map(|m| manifests_dir(m.as_str()))
    })
}

/// models ディレクトリから manifests ディレクトリを得る
pub fn manifests_dir(models_path: impl Into<PathBuf>) -> PathBuf {
    models_path.into().join("manifests")
}
