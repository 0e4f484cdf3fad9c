//! # ビルドバリアントの提供
//!
//! 署名モジュールはビルドバリアントごとに異なるエクスポート形状を持つ。
//!
//! - 自己初期化ビルド（server）: インポートした時点でアクティベーション済み
//! - webビルド（browser / worker-like）: アクティベーションのエントリポイントを持つ
//!   - `init_default()`: 引数なし。自身の配置場所からアセットを解決してインスタンス化する
//!   - `init_with(module)`: 事前コンパイル済みモジュールを受け取る非同期版
//!   - `init_sync(module)`: 事前コンパイル済みモジュールを受け取る同期版（任意）
//!
//! どのエントリポイントを持つかはロード時に`EntryPoints`として一度だけ確定する。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use sigload_wasm_host::{ActivatedModule, PrecompiledModule, WasmHost};

use crate::asset_loader::AssetLoader;
use crate::error::AcquireError;

/// Sendな動的Future。
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// アクティベーション済み署名モジュールへの共有ハンドル。
pub type ModuleHandle = Arc<ActivatedModule>;

/// webビルドが公開するアクティベーションのエントリポイント。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryPoints {
    /// 同期アクティベーション（事前コンパイル済みモジュールを受け取る）
    pub sync_init: bool,
    /// 非同期アクティベーション（デフォルトエクスポート）
    pub async_init: bool,
}

impl Default for EntryPoints {
    fn default() -> Self {
        Self {
            sync_init: true,
            async_init: true,
        }
    }
}

/// 事前コンパイル済みモジュールでアクティベーションする際の経路。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationRoute {
    Sync,
    Async,
}

impl EntryPoints {
    /// 同期版を優先し、なければ非同期版を選ぶ。
    pub fn route(&self) -> Option<ActivationRoute> {
        if self.sync_init {
            Some(ActivationRoute::Sync)
        } else if self.async_init {
            Some(ActivationRoute::Async)
        } else {
            None
        }
    }
}

/// webビルドのインターフェース。
pub trait WebBuild: Send + Sync {
    /// 公開しているエントリポイント。
    fn entry_points(&self) -> EntryPoints;

    /// 引数なしのデフォルトアクティベーション。
    fn init_default(&self) -> BoxFuture<'_, Result<ModuleHandle, AcquireError>>;

    /// 事前コンパイル済みモジュールを引数とする非同期アクティベーション。
    fn init_with(
        &self,
        module: PrecompiledModule,
    ) -> BoxFuture<'_, Result<ModuleHandle, AcquireError>>;

    /// 事前コンパイル済みモジュールを引数とする同期アクティベーション。
    ///
    /// インスタンス化（start関数を含む）が完了するまで呼び出し元をブロックする。
    /// 非同期コンテキストからは`spawn_blocking`経由で呼ぶこと。
    fn init_sync(&self, module: &PrecompiledModule) -> Result<ModuleHandle, AcquireError>;
}

/// ビルドバリアントとバイナリアセットのインポートを提供するトレイト。
pub trait ModuleProvider: Send + Sync {
    /// 自己初期化ビルドをインポートする（アクティベーション済みで返る）。
    fn import_self_initializing(&self) -> BoxFuture<'_, Result<ModuleHandle, AcquireError>>;

    /// webビルドのインターフェースをインポートする。
    fn import_web_build(&self) -> BoxFuture<'_, Result<Arc<dyn WebBuild>, AcquireError>>;

    /// webビルドのバイナリアセットを事前コンパイル済みの形でインポートする。
    fn import_precompiled_asset(&self) -> BoxFuture<'_, Result<PrecompiledModule, AcquireError>>;

    /// モジュールのコンパイル・インスタンス化に使うエンジン。
    fn host(&self) -> &WasmHost;
}

/// パッケージ内のアセット名と、webビルドのエントリポイント。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageAssets {
    /// 自己初期化ビルドのアセット
    pub bundler_asset: String,
    /// webビルドのアセット
    pub web_asset: String,
    /// webビルドが公開するエントリポイント
    pub entry_points: EntryPoints,
}

impl Default for PackageAssets {
    fn default() -> Self {
        Self {
            bundler_asset: crate::DEFAULT_BUNDLER_ASSET.to_string(),
            web_asset: crate::DEFAULT_WEB_ASSET.to_string(),
            entry_points: EntryPoints::default(),
        }
    }
}

/// アセットローダー上に配置されたパッケージからビルドバリアントを提供する。
pub struct PackageProvider {
    host: WasmHost,
    loader: Arc<dyn AssetLoader>,
    assets: PackageAssets,
}

impl PackageProvider {
    /// 新しいPackageProviderを作成する。
    ///
    /// # 引数
    /// - `host`: コンパイル・インスタンス化に使うエンジン
    /// - `loader`: アセットの取得元
    /// - `assets`: アセット名とエントリポイント
    pub fn new(host: WasmHost, loader: Arc<dyn AssetLoader>, assets: PackageAssets) -> Self {
        Self {
            host,
            loader,
            assets,
        }
    }
}

impl ModuleProvider for PackageProvider {
    fn import_self_initializing(&self) -> BoxFuture<'_, Result<ModuleHandle, AcquireError>> {
        Box::pin(async move {
            let module = fetch_and_compile(
                &self.host,
                self.loader.as_ref(),
                &self.assets.bundler_asset,
            )
            .await
            .map_err(AcquireError::Import)?;
            // 自己初期化ビルドはインポートの一部としてインスタンス化される
            instantiate_blocking(&self.host, module)
                .await
                .map_err(AcquireError::Import)
        })
    }

    fn import_web_build(&self) -> BoxFuture<'_, Result<Arc<dyn WebBuild>, AcquireError>> {
        Box::pin(async move {
            let build: Arc<dyn WebBuild> = Arc::new(PackageWebBuild {
                host: self.host.clone(),
                loader: Arc::clone(&self.loader),
                asset: self.assets.web_asset.clone(),
                entry_points: self.assets.entry_points,
            });
            Ok(build)
        })
    }

    fn import_precompiled_asset(&self) -> BoxFuture<'_, Result<PrecompiledModule, AcquireError>> {
        Box::pin(async move {
            fetch_and_compile(&self.host, self.loader.as_ref(), &self.assets.web_asset)
                .await
                .map_err(AcquireError::Import)
        })
    }

    fn host(&self) -> &WasmHost {
        &self.host
    }
}

/// パッケージのwebビルド。
pub struct PackageWebBuild {
    host: WasmHost,
    loader: Arc<dyn AssetLoader>,
    asset: String,
    entry_points: EntryPoints,
}

impl WebBuild for PackageWebBuild {
    fn entry_points(&self) -> EntryPoints {
        self.entry_points
    }

    fn init_default(&self) -> BoxFuture<'_, Result<ModuleHandle, AcquireError>> {
        Box::pin(async move {
            let module = fetch_and_compile(&self.host, self.loader.as_ref(), &self.asset)
                .await
                .map_err(AcquireError::Activation)?;
            instantiate_blocking(&self.host, module)
                .await
                .map_err(AcquireError::Activation)
        })
    }

    fn init_with(
        &self,
        module: PrecompiledModule,
    ) -> BoxFuture<'_, Result<ModuleHandle, AcquireError>> {
        Box::pin(async move {
            if !self.entry_points.async_init {
                return Err(AcquireError::Activation(
                    "webビルドは非同期アクティベーションを公開していません".to_string(),
                ));
            }
            instantiate_blocking(&self.host, module)
                .await
                .map_err(AcquireError::Activation)
        })
    }

    fn init_sync(&self, module: &PrecompiledModule) -> Result<ModuleHandle, AcquireError> {
        if !self.entry_points.sync_init {
            return Err(AcquireError::Activation(
                "webビルドは同期アクティベーションを公開していません".to_string(),
            ));
        }
        self.host
            .instantiate(module)
            .map(Arc::new)
            .map_err(AcquireError::activation)
    }
}

/// アセットを取得し、ブロッキングプール上でコンパイルする。
async fn fetch_and_compile(
    host: &WasmHost,
    loader: &dyn AssetLoader,
    asset: &str,
) -> Result<PrecompiledModule, String> {
    let binary = loader.load(asset).await?;
    let host = host.clone();
    tokio::task::spawn_blocking(move || host.compile(&binary.bytes, binary.source))
        .await
        .map_err(|e| format!("コンパイルタスクが異常終了しました: {e}"))?
        .map_err(|e| e.to_string())
}

/// ブロッキングプール上でインスタンス化する。
async fn instantiate_blocking(
    host: &WasmHost,
    module: PrecompiledModule,
) -> Result<ModuleHandle, String> {
    let host = host.clone();
    tokio::task::spawn_blocking(move || host.instantiate(&module))
        .await
        .map_err(|e| format!("インスタンス化タスクが異常終了しました: {e}"))?
        .map(Arc::new)
        .map_err(|e| e.to_string())
}
