//! # ファイルシステム アセットローダー
//!
//! ローカルディレクトリからWASMアセットを読み込む。
//! 開発・テスト環境用。

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use super::AssetLoader;
use super::WasmBinary;

/// ローカルディレクトリからアセットを読み込むローダー。
///
/// ディレクトリ構成: `{dir}/{asset_name}`
pub struct FileLoader {
    dir: PathBuf,
}

impl FileLoader {
    /// 新しいFileLoaderを作成する。
    ///
    /// # 引数
    /// - `dir`: WASMアセットが格納されているディレクトリパス
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl AssetLoader for FileLoader {
    fn load<'a>(
        &'a self,
        asset_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<WasmBinary, String>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.dir.join(asset_name);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| format!("WASMアセットの読み込みに失敗 ({}): {e}", path.display()))?;
            Ok(WasmBinary {
                source: format!("file://{}", path.display()),
                bytes,
            })
        })
    }

    fn location(&self) -> String {
        format!("file://{}", self.dir.display())
    }
}
