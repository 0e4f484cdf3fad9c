//! # Sigload
//!
//! 実行環境に応じて署名モジュール（WASM）のビルドバリアントを選択・ロード・アクティベーションし、
//! 結果をプロセス内で一度だけ共有する。
//!
//! ## 構成
//! - `profile`: ホスト機能の記述子から実行プロファイル（server / browser / worker-like）を分類
//! - `acquirer`: プロファイル別のロード手順と、取得結果の共有
//! - `provider`: ビルドバリアント（自己初期化ビルド、webビルド）の提供
//! - `asset_loader`: WASMアセットの取得（ファイル、HTTP）
//! - `global` / `worker`: プロセス全体の取得器と、ワーカー用の登録エントリポイント
//!
//! ## 使用例
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let module = sigload::acquire_module().await?;
//! let version = module.invoke_i32("version", &[])?;
//! # let _ = version;
//! # Ok(())
//! # }
//! ```

pub mod acquirer;
pub mod asset_loader;
pub mod config;
pub mod error;
pub mod global;
pub mod profile;
pub mod provider;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use acquirer::{ActivationState, ModuleAcquirer};
pub use config::{AssetSource, LoaderConfig};
pub use error::{AcquireError, ConfigError};
pub use global::acquire_module;
pub use profile::{HostCapabilities, RuntimeProfile};
pub use provider::{
    EntryPoints, ModuleHandle, ModuleProvider, PackageAssets, PackageProvider, WebBuild,
};
pub use sigload_wasm_host::{ActivatedModule, HostLimits, PrecompiledModule, WasmError, WasmHost};

/// 自己初期化ビルドのアセット名の既定値
pub const DEFAULT_BUNDLER_ASSET: &str = "bundler_bg.wasm";

/// webビルドのアセット名の既定値
pub const DEFAULT_WEB_ASSET: &str = "web_bg.wasm";
