//! # WASMアセットローダー
//!
//! ビルドバリアントのバイナリアセット（`.wasm`）の取得を抽象化する。
//! ローダーはバイト列を返すだけで、コンパイル・インスタンス化は行わない。
//!
//! ## ローダー実装
//! - `FileLoader`: ローカルディレクトリからアセットを読み込む（開発・テスト用）
//! - `HttpLoader`: URL経由でアセットを取得する（本番用、CDN等）

pub mod file;
pub mod http;

pub use file::FileLoader;
pub use http::HttpLoader;

use std::future::Future;
use std::pin::Pin;

/// アセットのロード結果。
pub struct WasmBinary {
    /// WASMバイナリデータ
    pub bytes: Vec<u8>,
    /// ソースURI（コンパイル済みモジュールに記録される）
    pub source: String,
}

/// アセットをロードするトレイト。
///
/// アセット名（例: `web_bg.wasm`）は、ビルドの配置場所からの相対名として解決される。
pub trait AssetLoader: Send + Sync {
    /// asset_nameに対応するバイナリをロードする。
    fn load<'a>(
        &'a self,
        asset_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<WasmBinary, String>> + Send + 'a>>;

    /// ロード元の説明（ログ用）。
    fn location(&self) -> String;
}
