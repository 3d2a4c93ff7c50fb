//! FsManifestScanner - ディスク上の manifest ツリーを走査する ManifestScanner
//!
//! # レイアウト
//! ```text
//! <root>/<repo>/<tag>/<manifest file>   -> "repo:tag"
//! <root>/<repo>/<manifest file>         -> "repo:<manifest file>"
//! ```
//!
//! # 学習ポイント
//! - 再帰ではなく明示的なスタックで走査（深いツリーでもスタックを食わない）
//! - serde の `#[serde(default)]` で「無くてもよい」フィールドを受ける

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::domain::InventoryItem;
use crate::ports::ManifestScanner;

const DIGEST_PREFIX: &str = "sha256:";
const MODEL_MEDIA_TYPE_SUFFIX: &str = "model";

#[derive(Debug, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    layers: Vec<Layer>,
}

#[derive(Debug, Deserialize)]
struct Layer {
    #[serde(rename = "mediaType", default)]
    media_type: String,
    #[serde(default)]
    digest: String,
    #[serde(default)]
    size: Option<u64>,
}

impl Layer {
    /// model layer で sha256 digest を持つなら hex を返す
    fn model_digest(&self) -> Option<&str> {
        if !self.media_type.ends_with(MODEL_MEDIA_TYPE_SUFFIX) {
            return None;
        }
        let hex = self.digest.strip_prefix(DIGEST_PREFIX)?;
        (hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit())).then_some(hex)
    }
}

/// ManifestError は 1 ファイル分の失敗（走査全体は止めない）
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid manifest document: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsManifestScanner;

impl FsManifestScanner {
    pub fn new() -> Self {
        Self
    }

    /// 1 ファイルを読んで item にする。model layer が無ければ `Ok(None)`
    pub fn read_manifest(
        &self,
        root: &Path,
        path: &Path,
    ) -> Result<Option<InventoryItem>, ManifestError> {
        let bytes = fs::read(path)?;
        let document: ManifestDocument = serde_json::from_slice(&bytes)?;

        Ok(document
            .layers
            .iter()
            .find_map(|layer| layer.model_digest().map(|hex| (hex, layer.size)))
            .map(|(hex, size)| InventoryItem {
                model_name: model_name(root, path),
                content_digest: hex.to_ascii_lowercase(),
                size_bytes: size,
            }))
    }
}

impl ManifestScanner for FsManifestScanner {
    fn scan(&self, root: &Path) -> Vec<InventoryItem> {
        if !root.is_dir() {
            warn!(path = %root.display(), "manifests path is missing or not a directory");
            return Vec::new();
        }

        info!(path = %root.display(), "scanning for models");
        let mut items = Vec::new();
        for path in walk_files(root) {
            match self.read_manifest(root, &path) {
                Ok(Some(item)) => {
                    debug!(model = %item.model_name, path = %path.display(), "found model");
                    items.push(item);
                }
                Ok(None) => {
                    debug!(path = %path.display(), "manifest has no model layer");
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "could not parse manifest file");
                }
            }
        }
        info!(count = items.len(), "model scan finished");
        items
    }
}

/// root 以下の全ファイルをパス順に列挙
///
/// 読めないディレクトリは warn してスキップ。シンボリックリンクのディレクトリは辿らない。
fn walk_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(path = %dir.display(), %error, "could not read directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() || path.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    files
}

/// root からの相対パスでモデル名を作る
///
/// ファイルの手前に 2 つ以上ディレクトリがあれば `{手前から 2 番目}:{直前}`、
/// 浅い場合は `{親ディレクトリ名}:{ファイル名}`。
pub fn model_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    if let [.., repo, tag, _file] = segments.as_slice() {
        return format!("{repo}:{tag}");
    }

    let parent = path
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{parent}:{file}")
}
