//! # プロセス全体の取得器
//!
//! プロセスに一つだけ存在する`ModuleAcquirer`を保持する。
//! 明示的に`install`されていなければ、最初の利用時に環境変数の設定から構築する。

use std::sync::OnceLock;

use crate::acquirer::ModuleAcquirer;
use crate::config::LoaderConfig;
use crate::error::AcquireError;
use crate::provider::ModuleHandle;

static ACQUIRER: OnceLock<ModuleAcquirer> = OnceLock::new();

/// プロセス全体の取得器を設定する。既に設定済みなら渡された取得器を返す。
pub fn install(acquirer: ModuleAcquirer) -> Result<(), ModuleAcquirer> {
    ACQUIRER.set(acquirer)
}

/// プロセス全体の取得器を返す。
pub fn acquirer() -> Result<&'static ModuleAcquirer, AcquireError> {
    if let Some(acquirer) = ACQUIRER.get() {
        return Ok(acquirer);
    }
    let config = LoaderConfig::from_env()?;
    let built = ModuleAcquirer::from_config(&config)?;
    // 競合時は先に設定された取得器を使う（構築しただけの取得器は何も起動していない）
    Ok(ACQUIRER.get_or_init(|| built))
}

/// 署名モジュールを取得する。
///
/// プロセス内で何度呼び出しても、ロード手順は一度だけ実行される。
/// 最初の呼び出しはtokioランタイム内で行う必要がある。
pub async fn acquire_module() -> Result<ModuleHandle, AcquireError> {
    acquirer()?.acquire().await
}
