//! # ローダー設定
//!
//! 環境変数からの設定読み込み。
//!
//! | 環境変数 | 既定値 | 内容 |
//! |---|---|---|
//! | `SIGLOAD_WASM_DIR` | `pkg` | アセットのディレクトリ |
//! | `SIGLOAD_WASM_BASE_URL` | なし | アセットのベースURL（`SIGLOAD_WASM_DIR`未設定時のみ使用） |
//! | `SIGLOAD_BUNDLER_ASSET` | `bundler_bg.wasm` | 自己初期化ビルドのアセット名 |
//! | `SIGLOAD_WEB_ASSET` | `web_bg.wasm` | webビルドのアセット名 |
//! | `SIGLOAD_SYNC_INIT` | `true` | webビルドが同期アクティベーションを公開するか |
//! | `SIGLOAD_ASYNC_INIT` | `true` | webビルドが非同期アクティベーションを公開するか |
//! | `SIGLOAD_FUEL_LIMIT` | `100000000` | 呼び出しごとのFuel制限 |
//! | `SIGLOAD_MEMORY_LIMIT` | `67108864` | Memory制限（バイト） |
//! | `SIGLOAD_HOST_CAPS` | ネイティブ | ホスト機能（例: `webassembly,fetch`） |

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use sigload_wasm_host::HostLimits;

use crate::asset_loader::{AssetLoader, FileLoader, HttpLoader};
use crate::error::{AcquireError, ConfigError};
use crate::profile::HostCapabilities;
use crate::provider::{EntryPoints, PackageAssets};

/// アセットの取得元。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    /// ローカルディレクトリ
    Dir(PathBuf),
    /// ベースURL
    Url(String),
}

/// ローダー設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    pub source: AssetSource,
    pub assets: PackageAssets,
    pub limits: HostLimits,
    pub capabilities: HostCapabilities,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            source: AssetSource::Dir(PathBuf::from("pkg")),
            assets: PackageAssets::default(),
            limits: HostLimits::default(),
            capabilities: HostCapabilities::native(),
        }
    }
}

impl LoaderConfig {
    /// 環境変数から設定を読み込む。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意の参照関数から設定を読み込む。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let source = match (lookup("SIGLOAD_WASM_DIR"), lookup("SIGLOAD_WASM_BASE_URL")) {
            (Some(dir), _) => AssetSource::Dir(PathBuf::from(dir)),
            (None, Some(url)) => AssetSource::Url(url),
            (None, None) => defaults.source,
        };

        let assets = PackageAssets {
            bundler_asset: lookup("SIGLOAD_BUNDLER_ASSET")
                .unwrap_or(defaults.assets.bundler_asset),
            web_asset: lookup("SIGLOAD_WEB_ASSET").unwrap_or(defaults.assets.web_asset),
            entry_points: EntryPoints {
                sync_init: parse_bool(&lookup, "SIGLOAD_SYNC_INIT", true)?,
                async_init: parse_bool(&lookup, "SIGLOAD_ASYNC_INIT", true)?,
            },
        };

        let limits = HostLimits {
            fuel_limit: parse_value(&lookup, "SIGLOAD_FUEL_LIMIT", defaults.limits.fuel_limit)?,
            memory_limit: parse_value(
                &lookup,
                "SIGLOAD_MEMORY_LIMIT",
                defaults.limits.memory_limit,
            )?,
        };

        let capabilities = match lookup("SIGLOAD_HOST_CAPS") {
            Some(caps) => caps.parse()?,
            None => defaults.capabilities,
        };

        Ok(Self {
            source,
            assets,
            limits,
            capabilities,
        })
    }

    /// 取得元に応じたアセットローダーを構築する。
    pub fn build_loader(&self) -> Result<Arc<dyn AssetLoader>, AcquireError> {
        let loader: Arc<dyn AssetLoader> = match &self.source {
            AssetSource::Dir(dir) => Arc::new(FileLoader::new(dir.clone())),
            AssetSource::Url(url) => {
                Arc::new(HttpLoader::new(url.clone()).map_err(AcquireError::Config)?)
            }
        };
        tracing::debug!(location = %loader.location(), "アセットローダーを構築しました");
        Ok(loader)
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        },
    }
}

fn parse_value<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
    }
}
