//! # Sigload WASMエンジン
//!
//! 署名モジュール（バイナリ依存モジュール）のコンパイル・インスタンス化・呼び出しを
//! wasmtimeを直接使用して実装する。
//!
//! ## 安全性確保
//! - Fuel制限: 呼び出しごとの命令実行数の上限（無限ループ防止）
//! - Memory制限: メモリ使用量の上限（OOM防止）
//! - catch_unwind: パニックをキャッチし、呼び出し元への影響を遮断
//!
//! ## 用語
//! - `PrecompiledModule`: コンパイル済みモジュール（アクティベーション前）
//! - `ActivatedModule`: インスタンス化済みモジュール（エクスポートを呼び出し可能）

use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use wasmtime::{
    Config, Engine, ExternType, Instance, Linker, Module, ResourceLimiter, Store, StoreLimits,
    StoreLimitsBuilder, Trap, Val,
};

/// Fuel制限のデフォルト値: 1億命令
pub const DEFAULT_FUEL_LIMIT: u64 = 100_000_000;

/// Memory制限のデフォルト値: 64MB
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// WASMエンジンのエラー型。
///
/// 全待機者に同じ結果を配布するため、ペイロードは文字列で保持する（`Clone`可能）。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WasmError {
    /// WASMモジュールのコンパイルエラー
    #[error("WASMコンパイルエラー: {0}")]
    Compile(String),
    /// インスタンス化エラー（インポート不一致等）
    #[error("WASMインスタンス化エラー: {0}")]
    Instantiation(String),
    /// 別のエンジンでコンパイルされたモジュール
    #[error("コンパイル済みモジュールのエンジンが一致しません: {0}")]
    EngineMismatch(String),
    /// エクスポートが存在しない
    #[error("エクスポートが見つかりません: {0}")]
    ExportNotFound(String),
    /// WASMモジュールの実行エラー
    #[error("WASM実行エラー: {0}")]
    Execution(String),
    /// Fuel制限超過
    #[error("Fuel制限を超過しました")]
    FuelExhausted,
    /// Memory制限超過
    #[error("Memory制限を超過しました")]
    MemoryLimitExceeded,
    /// WASMパニック
    #[error("WASMモジュールがパニックしました: {0}")]
    Panic(String),
}

/// ストアごとのリソース制限。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLimits {
    /// Fuel制限（呼び出しごとの命令実行数の上限）
    pub fuel_limit: u64,
    /// Memory制限（バイト）
    pub memory_limit: usize,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self {
            fuel_limit: DEFAULT_FUEL_LIMIT,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

/// ストアに保持するホスト側の状態。
pub struct HostState {
    limits: StoreLimits,
    /// 直近の操作でMemory制限に到達したか
    memory_exceeded: bool,
}

impl ResourceLimiter for HostState {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        let allowed = self.limits.memory_growing(current, desired, maximum)?;
        if !allowed {
            self.memory_exceeded = true;
        }
        Ok(allowed)
    }

    fn table_growing(
        &mut self,
        current: usize,
        desired: usize,
        maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        self.limits.table_growing(current, desired, maximum)
    }
}

/// WASMエンジン。
///
/// 同じ`WasmHost`（およびそのクローン）でコンパイルしたモジュールのみインスタンス化できる。
#[derive(Clone)]
pub struct WasmHost {
    engine: Engine,
    limits: HostLimits,
}

impl WasmHost {
    /// 新しいWasmHostを作成する。
    ///
    /// # 引数
    /// - `limits`: ストアごとのFuel制限・Memory制限
    pub fn new(limits: HostLimits) -> Result<Self, WasmError> {
        let mut config = Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config)
            .map_err(|e| WasmError::Compile(format!("エンジンの初期化に失敗: {e:#}")))?;
        Ok(Self { engine, limits })
    }

    /// リソース制限を返す。
    pub fn limits(&self) -> HostLimits {
        self.limits
    }

    /// WASMバイナリを検証・コンパイルする。
    ///
    /// # 引数
    /// - `bytes`: WASMバイナリ（またはWAT）
    /// - `source`: ソースURI（`file://...`、`https://...`等）
    pub fn compile(
        &self,
        bytes: &[u8],
        source: impl Into<String>,
    ) -> Result<PrecompiledModule, WasmError> {
        let source = source.into();
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| WasmError::Compile(format!("{source}: {e:#}")))?;
        tracing::debug!(%source, size = bytes.len(), "WASMモジュールをコンパイルしました");
        Ok(PrecompiledModule {
            module,
            source,
            wasm_hash: format_wasm_hash(bytes),
        })
    }

    /// コンパイル済みモジュールをインスタンス化する（アクティベーション）。
    ///
    /// 別エンジンでコンパイルされたモジュールは`EngineMismatch`、
    /// インポートを満たせないモジュールは`Instantiation`で拒否する。
    pub fn instantiate(&self, module: &PrecompiledModule) -> Result<ActivatedModule, WasmError> {
        if !module.is_compatible_with(self) {
            return Err(WasmError::EngineMismatch(module.source.clone()));
        }

        let mut store = self.new_store()?;
        let linker: Linker<HostState> = Linker::new(&self.engine);

        // start関数の実行にもFuel制限を適用する
        let instance = linker
            .instantiate(&mut store, &module.module)
            .map_err(|e| classify_error(&store, e, WasmError::Instantiation))?;

        tracing::debug!(source = %module.source, "WASMモジュールをインスタンス化しました");
        Ok(ActivatedModule {
            exports: module.exports(),
            source: module.source.clone(),
            wasm_hash: module.wasm_hash.clone(),
            fuel_limit: self.limits.fuel_limit,
            instance,
            store: Mutex::new(store),
        })
    }

    fn new_store(&self) -> Result<Store<HostState>, WasmError> {
        let state = HostState {
            limits: StoreLimitsBuilder::new()
                .memory_size(self.limits.memory_limit)
                .instances(1)
                .build(),
            memory_exceeded: false,
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| state as &mut dyn ResourceLimiter);
        store
            .set_fuel(self.limits.fuel_limit)
            .map_err(|e| WasmError::Instantiation(format!("Fuelの設定に失敗: {e:#}")))?;
        Ok(store)
    }
}

/// コンパイル済みモジュール（事前コンパイル済みバイナリオブジェクト）。
///
/// 内部の`wasmtime::Module`は参照カウントされるため、クローンは安価。
#[derive(Clone)]
pub struct PrecompiledModule {
    module: Module,
    source: String,
    wasm_hash: String,
}

impl PrecompiledModule {
    /// ソースURIを返す。
    pub fn source(&self) -> &str {
        &self.source
    }

    /// WASMバイナリのSHA-256ハッシュ（`0x`付き16進）を返す。
    pub fn wasm_hash(&self) -> &str {
        &self.wasm_hash
    }

    /// 指定のWasmHostでインスタンス化可能か（同一エンジンでコンパイルされたか）。
    pub fn is_compatible_with(&self, host: &WasmHost) -> bool {
        Engine::same(self.module.engine(), &host.engine)
    }

    /// エクスポート一覧を返す。
    pub fn exports(&self) -> Vec<ExportDescriptor> {
        self.module
            .exports()
            .map(|export| ExportDescriptor {
                name: export.name().to_string(),
                kind: ExportKind::from(export.ty()),
            })
            .collect()
    }
}

impl std::fmt::Debug for PrecompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrecompiledModule")
            .field("source", &self.source)
            .field("wasm_hash", &self.wasm_hash)
            .finish_non_exhaustive()
    }
}

/// エクスポートの種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Memory,
    Global,
    Table,
    Other,
}

impl From<ExternType> for ExportKind {
    fn from(ty: ExternType) -> Self {
        match ty {
            ExternType::Func(_) => ExportKind::Func,
            ExternType::Memory(_) => ExportKind::Memory,
            ExternType::Global(_) => ExportKind::Global,
            ExternType::Table(_) => ExportKind::Table,
            #[allow(unreachable_patterns)]
            _ => ExportKind::Other,
        }
    }
}

/// エクスポートの記述子。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDescriptor {
    pub name: String,
    pub kind: ExportKind,
}

/// アクティベーション済みモジュール。
///
/// ストアは呼び出しごとにロックされ、Fuelは呼び出しの度に`fuel_limit`まで補充される。
pub struct ActivatedModule {
    store: Mutex<Store<HostState>>,
    instance: Instance,
    exports: Vec<ExportDescriptor>,
    source: String,
    wasm_hash: String,
    fuel_limit: u64,
}

impl ActivatedModule {
    /// ソースURIを返す。
    pub fn source(&self) -> &str {
        &self.source
    }

    /// WASMバイナリのSHA-256ハッシュを返す。
    pub fn wasm_hash(&self) -> &str {
        &self.wasm_hash
    }

    /// エクスポート一覧を返す。
    pub fn exports(&self) -> &[ExportDescriptor] {
        &self.exports
    }

    /// エクスポート名の一覧を返す。
    pub fn export_names(&self) -> Vec<&str> {
        self.exports.iter().map(|e| e.name.as_str()).collect()
    }

    /// エクスポート関数を呼び出す。
    ///
    /// catch_unwindによりパニックを遮断し、呼び出し元への影響を防ぐ。
    ///
    /// # 引数
    /// - `name`: エクスポート関数名
    /// - `params`: 引数
    pub fn invoke(&self, name: &str, params: &[Val]) -> Result<Vec<Val>, WasmError> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| WasmError::Panic("ストアのロックが汚染されています".to_string()))?;

        let func = self
            .instance
            .get_func(&mut *store, name)
            .ok_or_else(|| WasmError::ExportNotFound(name.to_string()))?;

        store
            .set_fuel(self.fuel_limit)
            .map_err(|e| WasmError::Execution(format!("Fuelの設定に失敗: {e:#}")))?;
        store.data_mut().memory_exceeded = false;

        let result_len = func.ty(&*store).results().len();
        let mut results = vec![Val::I32(0); result_len];

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            func.call(&mut *store, params, &mut results)
        }));

        match outcome {
            Ok(Ok(())) => Ok(results),
            Ok(Err(e)) => Err(classify_error(&*store, e, WasmError::Execution)),
            Err(_) => Err(WasmError::Panic(format!(
                "{name} の実行中にパニックが発生しました"
            ))),
        }
    }

    /// i32引数・i32戻り値のエクスポート関数を呼び出す。
    pub fn invoke_i32(&self, name: &str, params: &[i32]) -> Result<Vec<i32>, WasmError> {
        let params: Vec<Val> = params.iter().copied().map(Val::I32).collect();
        self.invoke(name, &params)?
            .into_iter()
            .map(|v| match v {
                Val::I32(n) => Ok(n),
                other => Err(WasmError::Execution(format!(
                    "{name} がi32以外の値を返しました: {other:?}"
                ))),
            })
            .collect()
    }
}

impl std::fmt::Debug for ActivatedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivatedModule")
            .field("source", &self.source)
            .field("wasm_hash", &self.wasm_hash)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

/// wasmtimeのエラーを分類する。
fn classify_error(
    store: &Store<HostState>,
    err: wasmtime::Error,
    fallback: fn(String) -> WasmError,
) -> WasmError {
    if store.data().memory_exceeded {
        return WasmError::MemoryLimitExceeded;
    }
    if matches!(err.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
        return WasmError::FuelExhausted;
    }
    fallback(format!("{err:#}"))
}

/// WASMバイナリのSHA-256ハッシュを`0x`付き16進文字列で返す。
pub fn format_wasm_hash(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(Sha256::digest(bytes)))
}
