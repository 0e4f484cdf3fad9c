//! # ワーカー用エントリポイント
//!
//! バンドラーがWASMアセットを事前コンパイル済みモジュールとして提供するランタイム向け。
//! 取得開始前に事前コンパイル済みモジュールを登録すると、worker-likeのロード手順は
//! アセットを自分で取得せず、登録されたモジュールをアクティベーションに渡す。
//!
//! 取得開始後の登録は警告を出して無視される。

use sigload_wasm_host::PrecompiledModule;

use crate::error::AcquireError;
use crate::global;

/// プロセス全体の取得器に事前コンパイル済みモジュールを登録する。
pub fn set_precompiled_module(module: PrecompiledModule) -> Result<(), AcquireError> {
    global::acquirer()?.register_precompiled(module);
    Ok(())
}

/// WASMバイナリをプロセス全体の取得器のエンジンでコンパイルして登録する。
///
/// # 引数
/// - `bytes`: WASMバイナリ
/// - `source`: ソースURI
pub fn set_precompiled_bytes(bytes: &[u8], source: &str) -> Result<(), AcquireError> {
    let acquirer = global::acquirer()?;
    let module = acquirer
        .host()
        .compile(bytes, source)
        .map_err(AcquireError::import)?;
    acquirer.register_precompiled(module);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::acquirer::ModuleAcquirer;
    use crate::test_helpers::{CallCounts, MockBehavior, MockProvider, SIGN_WAT};

    /// プロセス全体の取得器に触れる唯一のテスト
    #[tokio::test]
    async fn test_worker_entrypoint_registers_on_global_acquirer() {
        let provider = MockProvider::new(MockBehavior::default());
        let counts = Arc::clone(&provider.counts);
        let acquirer = ModuleAcquirer::new(Arc::new(provider), "webassembly,fetch".parse().unwrap());
        assert!(global::install(acquirer).is_ok());

        let bytes = wat::parse_str(SIGN_WAT).unwrap();
        set_precompiled_bytes(&bytes, "bundled://web_bg.wasm").unwrap();

        let (a, b) = tokio::join!(global::acquire_module(), global::acquire_module());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.source(), "bundled://web_bg.wasm");
        assert_eq!(CallCounts::get(&counts.asset_imports), 0);
        assert_eq!(CallCounts::get(&counts.sync_inits), 1);

        // 取得開始後の登録は無視される
        set_precompiled_bytes(&bytes, "bundled://late.wasm").unwrap();
        let again = global::acquire_module().await.unwrap();
        assert!(Arc::ptr_eq(&a, &again));

        // 既に設定済みの場合は渡した取得器が返される
        let other = ModuleAcquirer::new(
            Arc::new(MockProvider::new(MockBehavior::default())),
            "server".parse().unwrap(),
        );
        assert!(global::install(other).is_err());
    }
}
