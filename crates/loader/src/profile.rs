//! # 実行環境の分類
//!
//! ホスト機能の記述子（`HostCapabilities`）から実行プロファイルを決定する純粋関数。
//! 業務ロジック内で環境を直接調べることはせず、必ず記述子を経由する。
//!
//! ## 判定順序（最初に一致したものを採用）
//! 1. `server`: サーバーランタイムのバージョン記述子が存在する
//! 2. `browser`: window と document が両方存在する
//! 3. `worker-like`: WebAssembly と fetch が両方存在する
//! 4. いずれにも一致しない場合は `server` にフォールバックする
//!
//! サーバーランタイムのテストハーネスはDOMを模擬することがあるため、
//! `server` 判定を最優先とする。

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ConfigError;

/// ホスト機能の記述子。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostCapabilities {
    /// サーバーランタイムのバージョン記述子（例: "x86_64-linux"）
    pub server_runtime: Option<String>,
    /// window 相当のグローバル
    pub window: bool,
    /// document 相当のグローバル
    pub document: bool,
    /// WebAssembly 相当のグローバル
    pub webassembly: bool,
    /// fetch 相当の関数
    pub fetch: bool,
}

impl HostCapabilities {
    /// ネイティブプロセスの機能記述子を返す。
    ///
    /// ネイティブプロセスはサーバーランタイムとして扱う。
    pub fn native() -> Self {
        Self {
            server_runtime: Some(format!(
                "{}-{}",
                std::env::consts::ARCH,
                std::env::consts::OS
            )),
            window: false,
            document: false,
            webassembly: true,
            fetch: true,
        }
    }
}

/// カンマ区切りの機能名から記述子を構築する。
///
/// 形式: `server[=<version>]`, `window`, `document`, `webassembly`（`wasm`）, `fetch`, `none`
impl FromStr for HostCapabilities {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut caps = HostCapabilities::default();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim())),
                None => (token, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "server" => {
                    caps.server_runtime = Some(value.unwrap_or("unknown").to_string());
                }
                "window" => caps.window = true,
                "document" => caps.document = true,
                "webassembly" | "wasm" => caps.webassembly = true,
                "fetch" => caps.fetch = true,
                "none" => {}
                _ => return Err(ConfigError::UnknownCapability(token.to_string())),
            }
        }
        Ok(caps)
    }
}

/// 実行プロファイル。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeProfile {
    /// サーバーランタイム（自己初期化ビルドを使用）
    Server,
    /// ブラウザ（webビルド + デフォルトアクティベーション）
    Browser,
    /// ワーカー/エッジランタイム（webビルド + 事前コンパイル済みモジュール）
    WorkerLike,
}

impl RuntimeProfile {
    /// 機能記述子に一致するプロファイルを返す。いずれにも一致しなければ`None`。
    pub fn detect(caps: &HostCapabilities) -> Option<Self> {
        if caps.server_runtime.is_some() {
            Some(RuntimeProfile::Server)
        } else if caps.window && caps.document {
            Some(RuntimeProfile::Browser)
        } else if caps.webassembly && caps.fetch {
            Some(RuntimeProfile::WorkerLike)
        } else {
            None
        }
    }

    /// 機能記述子を分類する。失敗せず、常にプロファイルを返す。
    pub fn classify(caps: &HostCapabilities) -> Self {
        Self::detect(caps).unwrap_or_else(|| {
            tracing::debug!(?caps, "一致するプロファイルがないためserverにフォールバックします");
            RuntimeProfile::Server
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeProfile::Server => "server",
            RuntimeProfile::Browser => "browser",
            RuntimeProfile::WorkerLike => "worker-like",
        }
    }
}

impl fmt::Display for RuntimeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
