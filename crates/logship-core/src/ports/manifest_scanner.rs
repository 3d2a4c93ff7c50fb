//! ManifestScanner port - モデル manifest ディレクトリの走査
//!
//! 走査はファイル単位で失敗を吸収する（1 ファイルの破損で全体を止めない）ので、
//! 戻り値は Result ではなく Vec。root が無い場合も空 Vec + warning。

use std::path::Path;

use crate::domain::InventoryItem;

pub trait ManifestScanner: Send + Sync {
    fn scan(&self, root: &Path) -> Vec<InventoryItem>;
}
