//! # テスト用共通ヘルパー
//!
//! 呼び出し回数を記録するモックプロバイダーと、フィクスチャ用のWASMモジュール。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sigload_wasm_host::{HostLimits, PrecompiledModule, WasmHost};

use crate::error::AcquireError;
use crate::provider::{BoxFuture, EntryPoints, ModuleHandle, ModuleProvider, WebBuild};

/// 署名モジュールを模したフィクスチャ。
pub const SIGN_WAT: &str = r#"
    (module
      (memory (export "memory") 1)
      (func (export "version") (result i32) i32.const 1)
      (func (export "checksum") (param i32 i32) (result i32)
        local.get 0
        local.get 1
        i32.xor))
"#;

/// インスタンス化に失敗するフィクスチャ（満たせないインポート）。
pub const UNLINKABLE_WAT: &str = r#"
    (module (import "wbg" "__wbindgen_throw" (func (param i32 i32))))
"#;

/// WATをWASMバイナリに変換してディレクトリに書き込む。
pub fn write_wat(dir: &std::path::Path, name: &str, wat_src: &str) {
    let bytes = wat::parse_str(wat_src).unwrap();
    std::fs::write(dir.join(name), bytes).unwrap();
}

/// テスト用モックHTTPサーバーを起動し、指定パスで指定データを返す。
pub async fn start_mock_storage(path: &str, data: Vec<u8>) -> u16 {
    use axum::routing::get;

    let app = axum::Router::new().route(
        path,
        get(move || {
            let d = data.clone();
            async move { d }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// モックが呼ばれた回数。
#[derive(Default)]
pub struct CallCounts {
    pub self_initializing_imports: AtomicUsize,
    pub web_build_imports: AtomicUsize,
    pub asset_imports: AtomicUsize,
    pub default_inits: AtomicUsize,
    pub async_inits: AtomicUsize,
    pub sync_inits: AtomicUsize,
    /// 直近のアクティベーションに渡されたモジュールのソースURI
    pub activation_input: Mutex<Option<String>>,
}

impl CallCounts {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// プロバイダー・webビルドの呼び出し総数
    pub fn total(&self) -> usize {
        [
            &self.self_initializing_imports,
            &self.web_build_imports,
            &self.asset_imports,
            &self.default_inits,
            &self.async_inits,
            &self.sync_inits,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }

    pub fn activation_input(&self) -> Option<String> {
        self.activation_input.lock().unwrap().clone()
    }
}

/// モックプロバイダーの挙動。
#[derive(Clone)]
pub struct MockBehavior {
    pub entry_points: EntryPoints,
    /// 各インポート・アクティベーションの前に待機する時間
    pub delay: Duration,
    /// インポートを失敗させる
    pub fail_import: bool,
    /// アクティベーションを失敗させる
    pub fail_activation: bool,
    /// インポート中にパニックさせる
    pub panic_import: bool,
    /// 同期アクティベーションでスレッドをブロックする時間
    pub sync_block: Duration,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            entry_points: EntryPoints::default(),
            delay: Duration::from_millis(20),
            fail_import: false,
            fail_activation: false,
            panic_import: false,
            sync_block: Duration::ZERO,
        }
    }
}

/// 呼び出しを記録するモックプロバイダー。
pub struct MockProvider {
    host: WasmHost,
    behavior: Arc<Mutex<MockBehavior>>,
    pub counts: Arc<CallCounts>,
}

impl MockProvider {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            host: WasmHost::new(HostLimits::default()).unwrap(),
            behavior: Arc::new(Mutex::new(behavior)),
            counts: Arc::new(CallCounts::default()),
        }
    }

    /// 取得開始後に挙動を切り替えるためのハンドル。
    pub fn behavior_handle(&self) -> Arc<Mutex<MockBehavior>> {
        Arc::clone(&self.behavior)
    }

    fn behavior(&self) -> MockBehavior {
        self.behavior.lock().unwrap().clone()
    }

    fn compile(&self, source: &str) -> PrecompiledModule {
        self.host.compile(SIGN_WAT.as_bytes(), source).unwrap()
    }
}

impl ModuleProvider for MockProvider {
    fn import_self_initializing(&self) -> BoxFuture<'_, Result<ModuleHandle, AcquireError>> {
        Box::pin(async move {
            self.counts
                .self_initializing_imports
                .fetch_add(1, Ordering::SeqCst);
            let behavior = self.behavior();
            tokio::time::sleep(behavior.delay).await;
            if behavior.panic_import {
                panic!("mock: bundler import panicked");
            }
            if behavior.fail_import {
                return Err(AcquireError::Import("mock://bundler.wasm: not found".to_string()));
            }
            let module = self.compile("mock://bundler_bg.wasm");
            Ok(Arc::new(self.host.instantiate(&module).unwrap()))
        })
    }

    fn import_web_build(&self) -> BoxFuture<'_, Result<Arc<dyn WebBuild>, AcquireError>> {
        Box::pin(async move {
            self.counts.web_build_imports.fetch_add(1, Ordering::SeqCst);
            let behavior = self.behavior();
            tokio::time::sleep(behavior.delay).await;
            if behavior.panic_import {
                panic!("mock: web build import panicked");
            }
            if behavior.fail_import {
                return Err(AcquireError::Import("mock://web.js: not found".to_string()));
            }
            let build: Arc<dyn WebBuild> = Arc::new(MockWebBuild {
                host: self.host.clone(),
                behavior: Arc::clone(&self.behavior),
                counts: Arc::clone(&self.counts),
            });
            Ok(build)
        })
    }

    fn import_precompiled_asset(&self) -> BoxFuture<'_, Result<PrecompiledModule, AcquireError>> {
        Box::pin(async move {
            self.counts.asset_imports.fetch_add(1, Ordering::SeqCst);
            let behavior = self.behavior();
            tokio::time::sleep(behavior.delay).await;
            if behavior.fail_import {
                return Err(AcquireError::Import("mock://web_bg.wasm: not found".to_string()));
            }
            Ok(self.compile("mock://web_bg.wasm"))
        })
    }

    fn host(&self) -> &WasmHost {
        &self.host
    }
}

/// 呼び出しを記録するモックwebビルド。
pub struct MockWebBuild {
    host: WasmHost,
    behavior: Arc<Mutex<MockBehavior>>,
    counts: Arc<CallCounts>,
}

impl MockWebBuild {
    fn behavior(&self) -> MockBehavior {
        self.behavior.lock().unwrap().clone()
    }

    fn activate(&self, module: &PrecompiledModule) -> Result<ModuleHandle, AcquireError> {
        *self.counts.activation_input.lock().unwrap() = Some(module.source().to_string());
        if self.behavior().fail_activation {
            return Err(AcquireError::Activation("mock: invalid binary".to_string()));
        }
        self.host
            .instantiate(module)
            .map(Arc::new)
            .map_err(AcquireError::activation)
    }
}

impl WebBuild for MockWebBuild {
    fn entry_points(&self) -> EntryPoints {
        self.behavior().entry_points
    }

    fn init_default(&self) -> BoxFuture<'_, Result<ModuleHandle, AcquireError>> {
        Box::pin(async move {
            self.counts.default_inits.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.behavior().delay).await;
            let module = self
                .host
                .compile(SIGN_WAT.as_bytes(), "mock://web/web_bg.wasm")
                .map_err(AcquireError::activation)?;
            self.activate(&module)
        })
    }

    fn init_with(
        &self,
        module: PrecompiledModule,
    ) -> BoxFuture<'_, Result<ModuleHandle, AcquireError>> {
        Box::pin(async move {
            self.counts.async_inits.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.behavior().delay).await;
            self.activate(&module)
        })
    }

    fn init_sync(&self, module: &PrecompiledModule) -> Result<ModuleHandle, AcquireError> {
        self.counts.sync_inits.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.behavior().sync_block);
        self.activate(module)
    }
}
