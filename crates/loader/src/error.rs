//! # ローダーエラー型
//!
//! モジュール取得の失敗は共有された取得結果として全ての呼び出し元に配布されるため、
//! エラー型は`Clone`可能でなければならない。ペイロードは文字列で保持する。

use sigload_wasm_host::WasmError;

/// モジュール取得エラー。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    /// ビルドバリアントまたはバイナリアセットのインポート失敗
    /// （アセット未検出、ネットワーク障害、コンパイルエラー）
    #[error("モジュールのインポートに失敗: {0}")]
    Import(String),
    /// アクティベーション失敗
    /// （不正なバイナリ、インスタンス化の不一致、エンジン不一致の事前コンパイル済みオブジェクト）
    #[error("モジュールのアクティベーションに失敗: {0}")]
    Activation(String),
    /// 取得処理が異常終了した（パニック等）
    #[error("モジュール取得処理が異常終了しました: {0}")]
    Aborted(String),
    /// 設定エラー
    #[error("設定エラー: {0}")]
    Config(String),
    /// 非同期ランタイムが利用できない
    #[error("非同期ランタイムエラー: {0}")]
    Runtime(String),
}

impl AcquireError {
    /// インポート段階で発生したWASMエラーを変換する。
    pub fn import(err: WasmError) -> Self {
        AcquireError::Import(err.to_string())
    }

    /// アクティベーション段階で発生したWASMエラーを変換する。
    pub fn activation(err: WasmError) -> Self {
        AcquireError::Activation(err.to_string())
    }
}

/// 設定読み込みエラー。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// 環境変数の値が不正
    #[error("環境変数 {key} の値が不正です: {value}")]
    InvalidValue { key: String, value: String },
    /// 未知のホスト機能名
    #[error("未知のホスト機能です: {0}")]
    UnknownCapability(String),
}

impl From<ConfigError> for AcquireError {
    fn from(err: ConfigError) -> Self {
        AcquireError::Config(err.to_string())
    }
}
